use fitparser::profile::field_types::{
    GarminProduct, Manufacturer as ProfileManufacturer, Sport as ProfileSport,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{GENERIC_SPORT, UNKNOWN_NAME};

const MANUFACTURERS_JSON: &str = include_str!("../../catalog/manufacturers.json");

/// Moving-speed thresholds in m/s.
const TOLERANCE_SLOW_MOVING: f64 = 0.1388;
const TOLERANCE_RUNNING_LIKE: f64 = 0.7916;
const TOLERANCE_CYCLING_LIKE: f64 = 1.41;

/// Manufacturer id whose products come from the `garmin_product` table.
const GARMIN: u16 = 1;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("manufacturer catalog is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u16,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manufacturer {
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub products: Vec<Product>,
}

impl Manufacturer {
    pub fn product(&self, id: u16) -> Option<&Product> {
        self.products.iter().find(|product| product.id == id)
    }

    /// Accepts FIT profile names (`fenix6`) as well as display names.
    pub fn product_by_name(&self, name: &str) -> Option<&Product> {
        if self.id == GARMIN {
            let product = GarminProduct::from(name);
            if !matches!(product, GarminProduct::Value(_)) {
                if let Some(found) = self.product(product.as_u16()) {
                    return Some(found);
                }
            }
        }

        let wanted = normalize_name(name);
        self.products
            .iter()
            .find(|product| normalize_name(&product.name) == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sport {
    pub id: u8,
    pub name: String,
    pub tolerance_moving_speed: f64,
}

/// Static device and sport catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    manufacturers: Vec<Manufacturer>,
    sports: Vec<Sport>,
}

impl Catalog {
    /// Build the catalog from the FIT profile tables, then apply the display
    /// names and extra products of the embedded manufacturer document.
    pub fn load() -> Result<Self, CatalogError> {
        let overrides: Vec<Manufacturer> = serde_json::from_str(MANUFACTURERS_JSON)?;

        let mut manufacturers: Vec<Manufacturer> = (1..=u16::MAX)
            .filter(|id| ProfileManufacturer::is_named_variant(i64::from(*id)))
            .map(|id| Manufacturer {
                id,
                name: title_case(&ProfileManufacturer::from(id).to_string()),
                products: if id == GARMIN {
                    garmin_products()
                } else {
                    Vec::new()
                },
            })
            .collect();

        for entry in overrides {
            match manufacturers.iter_mut().find(|m| m.id == entry.id) {
                Some(manufacturer) => {
                    manufacturer.name = entry.name;
                    merge_products(&mut manufacturer.products, entry.products);
                }
                None => manufacturers.push(entry),
            }
        }

        manufacturers.sort_by_key(|manufacturer| manufacturer.name.to_lowercase());
        for manufacturer in &mut manufacturers {
            manufacturer
                .products
                .sort_by_key(|product| product.name.to_lowercase());
        }

        let mut sports: Vec<Sport> = (0..u8::MAX)
            .filter(|id| ProfileSport::is_named_variant(i64::from(*id)))
            .map(ProfileSport::from)
            .filter(|sport| *sport != ProfileSport::All)
            .map(|sport| {
                let name = title_case(&sport.to_string());
                Sport {
                    id: sport.as_u8(),
                    tolerance_moving_speed: tolerance_moving_speed(&name),
                    name,
                }
            })
            .collect();
        sports.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Catalog {
            manufacturers,
            sports,
        })
    }

    /// Manufacturers ordered by name.
    pub fn manufacturers(&self) -> &[Manufacturer] {
        &self.manufacturers
    }

    /// Sports ordered by name.
    pub fn sports(&self) -> &[Sport] {
        &self.sports
    }

    pub fn manufacturer(&self, id: u16) -> Option<&Manufacturer> {
        self.manufacturers
            .iter()
            .find(|manufacturer| manufacturer.id == id)
    }

    /// FIT profile names resolve through their id, so `sigmasport` finds the
    /// entry whatever its display name. Anything else is compared case and
    /// punctuation insensitive: `polar electro` finds `Polar Electro`.
    pub fn manufacturer_by_name(&self, name: &str) -> Option<&Manufacturer> {
        let profile = ProfileManufacturer::from(name);
        if !matches!(profile, ProfileManufacturer::Value(_)) {
            if let Some(found) = self.manufacturer(profile.as_u16()) {
                return Some(found);
            }
        }

        let wanted = normalize_name(name);
        self.manufacturers
            .iter()
            .find(|manufacturer| normalize_name(&manufacturer.name) == wanted)
    }

    pub fn sport(&self, id: u8) -> Option<&Sport> {
        self.sports.iter().find(|sport| sport.id == id)
    }

    pub fn sport_by_name(&self, name: &str) -> Option<&Sport> {
        let wanted = normalize_name(name);
        self.sports
            .iter()
            .find(|sport| normalize_name(&sport.name) == wanted)
    }

    /// Display name of the creator device: `Garmin Fenix 6`, `Garmin (4242)`,
    /// or `Unknown`.
    pub fn creator_name(&self, manufacturer: Option<u16>, product: Option<u16>) -> String {
        let Some(manufacturer) = manufacturer.and_then(|id| self.manufacturer(id)) else {
            return UNKNOWN_NAME.to_string();
        };

        match product {
            Some(id) => match manufacturer.product(id) {
                Some(product) => format!("{} {}", manufacturer.name, product.name),
                None => format!("{} ({id})", manufacturer.name),
            },
            None => manufacturer.name.clone(),
        }
    }
}

fn garmin_products() -> Vec<Product> {
    (1..=u16::MAX)
        .filter(|id| GarminProduct::is_named_variant(i64::from(*id)))
        .map(|id| Product {
            id,
            name: title_case(&GarminProduct::from(id).to_string()),
        })
        .collect()
}

/// Renamed products replace the profile entry with the same id, new ones are
/// appended.
fn merge_products(products: &mut Vec<Product>, overrides: Vec<Product>) {
    for entry in overrides {
        match products.iter_mut().find(|product| product.id == entry.id) {
            Some(product) => product.name = entry.name,
            None => products.push(entry),
        }
    }
}

/// Minimum speed above which a sample counts as moving for `sport`.
pub fn tolerance_moving_speed(sport: &str) -> f64 {
    if sport.eq_ignore_ascii_case("Running") {
        TOLERANCE_RUNNING_LIKE
    } else if sport.eq_ignore_ascii_case("Cycling") {
        TOLERANCE_CYCLING_LIKE
    } else {
        TOLERANCE_SLOW_MOVING
    }
}

pub fn is_considered_moving(sport: &str, speed: Option<f64>) -> bool {
    speed.is_some_and(|speed| speed > tolerance_moving_speed(sport))
}

/// `fitness_equipment` → `Fitness Equipment`. Empty input becomes `Generic`.
pub fn title_case(raw: &str) -> String {
    let words: Vec<String> = raw
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        GENERIC_SPORT.to_string()
    } else {
        words.join(" ")
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::load().expect("embedded catalog parses")
    }

    #[test]
    fn manufacturers_are_sorted_and_searchable() {
        let catalog = catalog();
        let names: Vec<&str> = catalog
            .manufacturers()
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|name| name.to_lowercase());
        assert_eq!(names, sorted);

        assert_eq!(catalog.manufacturer_by_name("polar_electro").map(|m| m.id), Some(123));
        assert_eq!(catalog.manufacturer(1).map(|m| m.name.as_str()), Some("Garmin"));
        assert!(catalog.manufacturer(9999).is_none());
    }

    #[test]
    fn sports_resolve_by_name_and_id() {
        let catalog = catalog();
        assert_eq!(catalog.sport_by_name("running").map(|s| s.id), Some(1));
        assert_eq!(catalog.sport_by_name("E Biking").map(|s| s.id), Some(21));
        assert_eq!(catalog.sport(2).map(|s| s.name.as_str()), Some("Cycling"));
        assert!(catalog.sport_by_name("quidditch").is_none());
        assert_eq!(catalog.sport(48).map(|s| s.name.as_str()), Some("Floor Climbing"));
        assert!(catalog.sport(254).is_none());
    }

    #[test]
    fn profile_manufacturers_outside_the_document_are_listed() {
        let catalog = catalog();
        let sigma = catalog.manufacturer(70).expect("sigma sport");
        assert_eq!(sigma.name, "Sigmasport");
        assert_eq!(catalog.manufacturer_by_name("sigmasport").map(|m| m.id), Some(70));
        assert_eq!(catalog.creator_name(Some(70), None), "Sigmasport");
        assert!(catalog.manufacturers().len() > 200);
    }

    #[test]
    fn document_names_override_profile_names() {
        let catalog = catalog();
        let garmin = catalog.manufacturer(1).expect("garmin");
        assert_eq!(garmin.product(3290).map(|p| p.name.as_str()), Some("Fenix 6"));
        assert_eq!(garmin.product_by_name("fenix6").map(|p| p.id), Some(3290));
        assert!(garmin.products.len() > 100);
        assert_eq!(
            catalog.manufacturer(32).map(|m| m.name.as_str()),
            Some("Wahoo Fitness")
        );
    }

    #[test]
    fn sport_tolerances() {
        let catalog = catalog();
        let running = catalog.sport_by_name("Running").expect("running");
        assert_eq!(running.tolerance_moving_speed, 0.7916);
        let cycling = catalog.sport_by_name("Cycling").expect("cycling");
        assert_eq!(cycling.tolerance_moving_speed, 1.41);
        assert_eq!(tolerance_moving_speed("Hiking"), 0.1388);

        assert!(is_considered_moving("Running", Some(1.0)));
        assert!(!is_considered_moving("Cycling", Some(1.0)));
        assert!(!is_considered_moving("Running", None));
    }

    #[test]
    fn creator_names() {
        let catalog = catalog();
        assert_eq!(catalog.creator_name(Some(1), Some(3290)), "Garmin Fenix 6");
        assert_eq!(catalog.creator_name(Some(1), Some(4242)), "Garmin (4242)");
        assert_eq!(catalog.creator_name(Some(294), None), "Coros");
        assert_eq!(catalog.creator_name(Some(9999), Some(1)), "Unknown");
        assert_eq!(catalog.creator_name(None, None), "Unknown");
    }

    #[test]
    fn title_casing() {
        assert_eq!(title_case("fitness_equipment"), "Fitness Equipment");
        assert_eq!(title_case("RUNNING"), "Running");
        assert_eq!(title_case(""), "Generic");
    }
}
