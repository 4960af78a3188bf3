#[macro_export]
macro_rules! is_power_of_2 {
    ($x:expr) => {
        ($x) != 0 && ($x) & (($x) - 1) == 0
    };
}
#[macro_export]
macro_rules! round_up {
    ($x:expr, $y:expr) => {{
        debug_assert!(is_power_of_2!($y));
        (($x) + ($y) - 1) & (!($y) + 1)
    }};
}

/// Integer division rounding towards positive infinity.
#[inline]
pub fn div_ceil(x: u64, y: u64) -> u64 {
    (x + y - 1) / y
}

#[cfg(test)]
#[test]
fn test_round_up() {
    crate::tests_init();

    assert_eq!(round_up!(54, 512), 512);
    assert_eq!(round_up!(513, 512), 1024);
    assert_eq!(round_up!(16384, 512), 16384);
    assert_eq!(round_up!(1u64, 1u64), 1);
    assert_eq!(round_up!(33u64, 4u64), 36);
}

#[cfg(test)]
#[test]
fn test_is_power_of_2() {
    crate::tests_init();

    assert!(!is_power_of_2!(0));
    assert!(!is_power_of_2!(7));
    assert!(is_power_of_2!(8));
    assert!(!is_power_of_2!(63));
    assert!(is_power_of_2!(64));
    assert!(!is_power_of_2!(65));
    assert!(is_power_of_2!(9223372036854775808u64));
}

#[cfg(test)]
#[test]
fn test_div_ceil() {
    crate::tests_init();

    assert_eq!(div_ceil(0, 512), 0);
    assert_eq!(div_ceil(1, 512), 1);
    assert_eq!(div_ceil(512, 512), 1);
    assert_eq!(div_ceil(8178, 512), 16);
    assert_eq!(div_ceil(32 * 1024, 1024), 32);
}
