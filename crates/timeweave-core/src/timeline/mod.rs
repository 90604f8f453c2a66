//! Calendar timeline helpers.
//!
//! This module provides:
//! - Gap and conflict computation over booked assignments
//! - Expansion of weekly availability into dated windows

mod availability;
mod gap;

pub use availability::{
    day_of_week, expand_availability, subtract_exceptions, AvailabilityCalendarEntry,
    CalendarException,
};
pub use gap::{
    assignments_for_task, calculate_gaps, find_conflicting_assignments, merge_assignments,
    remove_assignments_for_task,
};
