//! Kani proofs for activation windows
//!
//! Bounded model checking of the hour-window arithmetic used by
//! `when_time_range`.
//!
//! Run with: `cargo kani --harness verify_*`

#[cfg(kani)]
use crate::activation::hour_in_window;

/// **Property**: an empty window (`start == end`) is never active.
#[cfg(kani)]
#[kani::proof]
fn verify_empty_window_never_active() {
    let hour: u32 = kani::any();
    let bound: u32 = kani::any();
    kani::assume(hour < 24 && bound < 24);

    assert!(!hour_in_window(hour, bound, bound));
}

/// **Property**: the start hour is always inside a non-empty window and the
/// end hour never is.
#[cfg(kani)]
#[kani::proof]
fn verify_window_bounds() {
    let start: u32 = kani::any();
    let end: u32 = kani::any();
    kani::assume(start < 24 && end < 24 && start != end);

    assert!(hour_in_window(start, start, end));
    assert!(!hour_in_window(end, start, end));
}

/// **Property**: a midnight-crossing window is the complement of the
/// daytime window with swapped bounds.
#[cfg(kani)]
#[kani::proof]
fn verify_overnight_is_complement() {
    let hour: u32 = kani::any();
    let start: u32 = kani::any();
    let end: u32 = kani::any();
    kani::assume(hour < 24 && start < 24 && end < 24 && start > end);

    assert_eq!(
        hour_in_window(hour, start, end),
        !hour_in_window(hour, end, start)
    );
}
