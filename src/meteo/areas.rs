use once_cell::sync::Lazy;

/// A Norwegian electricity price area with the reference city whose
/// coordinates are used for weather retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceArea {
    pub code: &'static str,
    pub city: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

impl PriceArea {
    pub const fn new(code: &'static str, city: &'static str, latitude: f64, longitude: f64) -> Self {
        Self {
            code,
            city,
            latitude,
            longitude,
        }
    }
}

/// All Norwegian price areas, ordered NO1 through NO5.
pub static PRICE_AREAS: Lazy<Vec<PriceArea>> = Lazy::new(|| {
    vec![
        PriceArea::new("NO1", "Oslo", 59.91273, 10.74609),
        PriceArea::new("NO2", "Kristiansand", 58.14671, 7.99560),
        PriceArea::new("NO3", "Trondheim", 63.43049, 10.39506),
        PriceArea::new("NO4", "Tromsø", 69.64890, 18.95508),
        PriceArea::new("NO5", "Bergen", 60.39299, 5.32415),
    ]
});

/// Look up a price area by its code, case-insensitively.
pub fn get_area(code: &str) -> Option<&'static PriceArea> {
    PRICE_AREAS.iter().find(|a| a.code.eq_ignore_ascii_case(code))
}

/// All price areas in registry order.
pub fn list_areas() -> &'static [PriceArea] {
    &PRICE_AREAS
}

impl std::fmt::Display for PriceArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code, self.city)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(get_area("no4").unwrap().city, "Tromsø");
        assert_eq!(get_area("NO1").unwrap().city, "Oslo");
        assert!(get_area("NO6").is_none());
    }

    #[test]
    fn registry_lists_all_five_areas() {
        let codes: Vec<_> = list_areas().iter().map(|a| a.code).collect();
        assert_eq!(codes, ["NO1", "NO2", "NO3", "NO4", "NO5"]);
    }
}
