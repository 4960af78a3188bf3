use std::fmt;

/// Inclusive range of sectors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    start: u64,
    end: u64,
}

impl Region {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(end >= start);
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, sector: u64) -> bool {
        sector >= self.start && sector <= self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{} - {}}}", self.start, self.end)
    }
}

#[cfg(test)]
#[test]
fn test_region_contains() {
    crate::tests_init();

    macro_rules! test {
        ($cond:ident, {$start:expr, $end:expr}, $sector:expr) => {{
            assert!(Region::new($start, $end).contains($sector) == $cond);
        }};
    }

    test!(true, {0, 31}, 0);
    test!(true, {0, 31}, 31);
    test!(true, {6, 6}, 6);
    test!(false, {0, 31}, 32);
    test!(false, {6, 7}, 5);
    test!(false, {6, 7}, 8);

    assert_eq!(format!("{}", Region::new(0, 7)), "{0 - 7}");
}
