//! Aperio SVS metadata.
//!
//! SVS files are tiled TIFFs whose first ImageDescription carries the scan
//! metadata:
//!
//! ```text
//! Aperio Image Library v12.0.15
//! 46000x32914 [0,100 46000x32814] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.4990|...
//! ```
//!
//! The first line identifies the vendor; the rest is pipe-separated
//! `key = value` pairs.

use std::collections::HashMap;

/// Marker that identifies an Aperio ImageDescription.
pub const APERIO_MARKER: &str = "Aperio";

/// Parsed SVS ImageDescription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,

    /// Objective (base) magnification, e.g. 20 or 40
    pub magnification: Option<f64>,

    pub vendor: Option<String>,

    /// All `key = value` pairs
    pub properties: HashMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata {
            vendor: description
                .contains(APERIO_MARKER)
                .then(|| APERIO_MARKER.to_string()),
            ..Default::default()
        };

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.magnification = value.parse().ok().filter(|m: &f64| *m > 0.0),
                _ => {}
            }
            metadata.properties.insert(key.to_string(), value.to_string());
        }

        metadata
    }

    pub fn is_aperio(&self) -> bool {
        self.vendor.is_some()
    }
}
