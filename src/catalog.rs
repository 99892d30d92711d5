use std::{collections::HashSet, fs, path::Path};

use eyre::{bail, WrapErr};
use serde::{Deserialize, Serialize};

use crate::model::Entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom: Option<u8>,
    entities: Vec<Entity>,
}

impl Catalog {
    pub fn new(title: impl Into<String>, entities: Vec<Entity>) -> eyre::Result<Self> {
        let catalog = Self {
            title: title.into(),
            center: None,
            zoom: None,
            entities,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn with_view(mut self, center: (f64, f64), zoom: u8) -> Self {
        self.center = Some(center);
        self.zoom = Some(zoom);
        self
    }

    pub fn from_json(text: &str) -> eyre::Result<Self> {
        let catalog: Catalog = serde_json::from_str(text).wrap_err("malformed catalog json")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read catalog {}", path.display()))?;
        Self::from_json(&text).wrap_err_with(|| format!("invalid catalog {}", path.display()))
    }

    /// Resolves a built-in catalog name first, then falls back to a JSON file path.
    pub fn resolve(name_or_path: &str) -> eyre::Result<Self> {
        match builtin(name_or_path) {
            Some(catalog) => catalog,
            None => Self::load(name_or_path),
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        let mut seen = HashSet::new();

        for entity in &self.entities {
            if entity.display_name.trim().is_empty() {
                bail!("catalog '{}' has an entity with an empty name", self.title);
            }
            if entity.source_key.trim().is_empty() {
                bail!(
                    "catalog '{}': '{}' has an empty source key",
                    self.title,
                    entity.display_name
                );
            }
            if !seen.insert(entity.display_name.as_str()) {
                bail!(
                    "catalog '{}': duplicate entity '{}'",
                    self.title,
                    entity.display_name
                );
            }
        }

        Ok(())
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.display_name.clone()).collect()
    }

    pub fn get(&self, display_name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.display_name == display_name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities for the given names, in the order the names were given.
    pub fn select(&self, names: &[String]) -> eyre::Result<Vec<&Entity>> {
        names
            .iter()
            .map(|name| match self.get(name) {
                Some(entity) => Ok(entity),
                None => bail!("'{name}' is not in catalog '{}'", self.title),
            })
            .collect()
    }
}

pub const BUILTIN_NAMES: [&str; 4] = ["stocks", "crypto", "tokyo", "london"];

pub fn builtin(name: &str) -> Option<eyre::Result<Catalog>> {
    match name {
        "stocks" => Some(stocks()),
        "crypto" => Some(crypto()),
        "tokyo" => Some(tokyo()),
        "london" => Some(london()),
        _ => None,
    }
}

fn tickers(pairs: &[(&str, &str)]) -> Vec<Entity> {
    pairs
        .iter()
        .map(|(name, key)| Entity::new(*name, *key))
        .collect()
}

pub fn stocks() -> eyre::Result<Catalog> {
    Catalog::new(
        "Top-10 global market-cap stocks",
        tickers(&[
            ("Apple (AAPL)", "AAPL"),
            ("Microsoft (MSFT)", "MSFT"),
            ("NVIDIA (NVDA)", "NVDA"),
            ("Alphabet (GOOGL)", "GOOGL"),
            ("Amazon (AMZN)", "AMZN"),
            ("Saudi Aramco (2222.SR)", "2222.SR"),
            ("Meta Platforms (META)", "META"),
            ("Berkshire Hathaway (BRK-B)", "BRK-B"),
            ("Broadcom (AVGO)", "AVGO"),
            ("Tesla (TSLA)", "TSLA"),
        ]),
    )
}

pub fn crypto() -> eyre::Result<Catalog> {
    Catalog::new(
        "Top-10 crypto assets (USD)",
        tickers(&[
            ("Bitcoin", "BTC-USD"),
            ("Ethereum", "ETH-USD"),
            ("Tether (USDT)", "USDT-USD"),
            ("BNB", "BNB-USD"),
            ("Solana", "SOL-USD"),
            ("XRP", "XRP-USD"),
            ("USD Coin (USDC)", "USDC-USD"),
            ("Dogecoin", "DOGE-USD"),
            ("Cardano", "ADA-USD"),
            ("Shiba Inu", "SHIB-USD"),
        ]),
    )
}

fn landmark(name: &str, lat: f64, lon: f64, description: &str) -> Entity {
    Entity::new(name, name)
        .with_coords(lat, lon)
        .with_description(description)
}

pub fn tokyo() -> eyre::Result<Catalog> {
    Ok(Catalog::new(
        "Tokyo sightseeing guide",
        vec![
            landmark(
                "Tokyo Tower",
                35.6585805,
                139.7454329,
                "The city's landmark lattice tower. The observation deck overlooks central Tokyo and the night view is a highlight.",
            ),
            landmark(
                "Asakusa & Senso-ji",
                35.714765,
                139.796655,
                "Tokyo's oldest temple and the traditional Nakamise shopping street.",
            ),
            landmark(
                "Shibuya Scramble Crossing",
                35.659494,
                139.700553,
                "One of the busiest crossings in the world, next to the Hachiko statue.",
            ),
            landmark(
                "Meiji Jingu",
                35.6764,
                139.6993,
                "A shrine set in a dense forest, good for a quiet walk.",
            ),
            landmark(
                "Shinjuku Gyoen",
                35.685175,
                139.710052,
                "A large garden in the middle of the city, famous for cherry blossoms in spring.",
            ),
        ],
    )?
    .with_view((35.682839, 139.759455), 12))
}

const WIKIMEDIA: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb";

pub fn london() -> eyre::Result<Catalog> {
    let image = |path: &str| format!("{WIKIMEDIA}/{path}");

    Ok(Catalog::new(
        "London sightseeing guide",
        vec![
            landmark(
                "Buckingham Palace",
                51.5014,
                -0.1419,
                "The monarch's official residence. The Changing of the Guard draws crowds, and some state rooms open in summer.",
            )
            .with_image_url(image("c/cd/Buckingham_Palace_with_Victoria_Memorial.jpg/320px-Buckingham_Palace_with_Victoria_Memorial.jpg")),
            landmark(
                "Tower of London",
                51.5081,
                -0.0759,
                "A castle with a thousand years of history: palace, fortress and prison, now home to the Crown Jewels.",
            )
            .with_image_url(image("c/c3/Tower_of_London_from_Tower_Bridge.jpg/320px-Tower_of_London_from_Tower_Bridge.jpg")),
            landmark(
                "Big Ben (Houses of Parliament)",
                51.5007,
                -0.1246,
                "The great bell in the clock tower of the Palace of Westminster, on the bank of the Thames.",
            )
            .with_image_url(image("d/d7/Big_Ben_at_Dusk.jpg/320px-Big_Ben_at_Dusk.jpg")),
            landmark(
                "British Museum",
                51.5194,
                -0.1269,
                "One of the largest museums in the world: Egyptian mummies, the Rosetta Stone, the Parthenon sculptures.",
            )
            .with_image_url(image("e/e0/British_Museum_from_Russell_Square_garden.jpg/320px-British_Museum_from_Russell_Square_garden.jpg")),
            landmark(
                "London Eye",
                51.5033,
                -0.1195,
                "A 135 metre observation wheel on the South Bank with a panoramic view of the city.",
            )
            .with_image_url(image("a/a2/London_Eye_from_Westminster_Bridge.jpg/320px-London_Eye_from_Westminster_Bridge.jpg")),
        ],
    )?
    .with_view((51.5074, -0.1278), 13))
}

#[cfg(test)]
mod tests {
    use super::{builtin, Catalog, BUILTIN_NAMES};
    use crate::model::Entity;

    #[test]
    fn unittest_builtin_catalogs_are_valid() -> eyre::Result<()> {
        for name in BUILTIN_NAMES {
            let catalog = builtin(name).unwrap()?;
            assert!(!catalog.is_empty(), "{name}");
        }
        assert!(builtin("nowhere").is_none());
        Ok(())
    }

    #[test]
    fn unittest_duplicate_names_rejected() {
        let result = Catalog::new(
            "dup",
            vec![Entity::new("Apple", "AAPL"), Entity::new("Apple", "AAPL.MX")],
        );
        assert!(result.is_err());

        let result = Catalog::new("blank", vec![Entity::new("Apple", " ")]);
        assert!(result.is_err());
    }

    #[test]
    fn unittest_select_keeps_requested_order() -> eyre::Result<()> {
        let catalog = super::stocks()?;
        let names = vec!["Tesla (TSLA)".to_string(), "Apple (AAPL)".to_string()];
        let picked = catalog.select(&names)?;

        assert_eq!(picked[0].source_key, "TSLA");
        assert_eq!(picked[1].source_key, "AAPL");
        assert!(catalog.select(&["Nope".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn unittest_catalog_from_json() -> eyre::Result<()> {
        let text = r#"{
            "title": "mine",
            "center": [1.0, 2.0],
            "entities": [
                { "display_name": "A", "source_key": "a", "lat": 1.5, "lon": 2.5 },
                { "display_name": "B", "source_key": "b" }
            ]
        }"#;
        let catalog = Catalog::from_json(text)?;

        assert_eq!(catalog.names(), vec!["A", "B"]);
        assert_eq!(catalog.center, Some((1.0, 2.0)));
        assert_eq!(catalog.get("A").and_then(|e| e.coords()), Some((1.5, 2.5)));
        Ok(())
    }
}
