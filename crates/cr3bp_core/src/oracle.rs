//! Sources of periodic-orbit initial conditions.
//!
//! Orbits handed out here are trusted: nothing in this crate re-checks that a
//! state and period actually close on themselves.

use std::fmt;
use std::io::Read;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamics::MassRatio;
use crate::libration::LibrationPoint;
use crate::types::{PeriodicOrbit, STATE_DIM};

/// Relative tolerance when matching a requested mass ratio to catalog entries.
const MASS_RATIO_MATCH: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitFamily {
    /// Planar orbits about a collinear point.
    Lyapunov,
    Halo,
    Vertical,
}

impl fmt::Display for OrbitFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrbitFamily::Lyapunov => "Lyapunov",
            OrbitFamily::Halo => "halo",
            OrbitFamily::Vertical => "vertical",
        };
        f.write_str(name)
    }
}

/// Anything that can produce a periodic orbit for a given family member.
pub trait PeriodicOrbitOracle {
    /// `amplitude` picks a family member; `None` leaves the choice to the oracle.
    fn find_periodic_orbit(
        &self,
        mass_ratio: MassRatio,
        family: OrbitFamily,
        point: LibrationPoint,
        amplitude: Option<f64>,
    ) -> Result<PeriodicOrbit>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub mass_ratio: MassRatio,
    pub family: OrbitFamily,
    pub point: LibrationPoint,
    pub amplitude: f64,
    pub state: [f64; STATE_DIM],
    pub period: f64,
}

impl CatalogEntry {
    pub fn orbit(&self) -> Result<PeriodicOrbit> {
        PeriodicOrbit::from_components(self.state, self.period).with_context(|| {
            format!(
                "Catalog entry {} {} (amplitude {}) is not a valid orbit.",
                self.point, self.family, self.amplitude
            )
        })
    }

    fn matches(&self, mass_ratio: MassRatio, family: OrbitFamily, point: LibrationPoint) -> bool {
        let (mine, wanted) = (self.mass_ratio.value(), mass_ratio.value());
        self.family == family
            && self.point == point
            && (mine - wanted).abs() <= MASS_RATIO_MATCH * wanted
    }
}

/// Tabulated orbits, typically loaded from JSON.
///
/// ```json
/// { "entries": [ { "mass_ratio": 0.01215, "family": "Halo", "point": "L1",
///   "amplitude": 0.02, "state": [0.82, 0, -0.02, 0, 0.13, 0], "period": 2.74 } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrbitCatalog {
    entries: Vec<CatalogEntry>,
}

impl OrbitCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        for (index, entry) in entries.iter().enumerate() {
            if !entry.amplitude.is_finite() {
                bail!("Catalog entry {index} has a non-finite amplitude.");
            }
            entry
                .orbit()
                .with_context(|| format!("Invalid catalog entry {index}."))?;
        }
        Ok(Self { entries })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: OrbitCatalog =
            serde_json::from_str(json).context("Failed to parse orbit catalog JSON.")?;
        Self::new(raw.entries)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let raw: OrbitCatalog =
            serde_json::from_reader(reader).context("Failed to read orbit catalog JSON.")?;
        Self::new(raw.entries)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize orbit catalog.")
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: CatalogEntry) -> Result<()> {
        entry.orbit()?;
        self.entries.push(entry);
        Ok(())
    }

    /// Entry of the requested family nearest `amplitude`; without an amplitude
    /// the smallest member. Equal distances go to the earlier entry.
    pub fn nearest(
        &self,
        mass_ratio: MassRatio,
        family: OrbitFamily,
        point: LibrationPoint,
        amplitude: Option<f64>,
    ) -> Option<&CatalogEntry> {
        let key = |entry: &CatalogEntry| match amplitude {
            Some(target) => (entry.amplitude - target).abs(),
            None => entry.amplitude,
        };
        self.entries
            .iter()
            .filter(|entry| entry.matches(mass_ratio, family, point))
            .fold(None, |best: Option<&CatalogEntry>, entry| match best {
                Some(current) if key(current) <= key(entry) => Some(current),
                _ => Some(entry),
            })
    }
}

impl PeriodicOrbitOracle for OrbitCatalog {
    fn find_periodic_orbit(
        &self,
        mass_ratio: MassRatio,
        family: OrbitFamily,
        point: LibrationPoint,
        amplitude: Option<f64>,
    ) -> Result<PeriodicOrbit> {
        if let Some(target) = amplitude {
            if !target.is_finite() {
                bail!("Requested amplitude must be finite, got {target}.");
            }
        }
        let Some(entry) = self.nearest(mass_ratio, family, point, amplitude) else {
            bail!(
                "No {point} {family} orbits catalogued for μ = {}.",
                mass_ratio.value()
            );
        };
        debug!(
            %point,
            %family,
            amplitude = entry.amplitude,
            period = entry.period,
            "catalog orbit selected"
        );
        entry.orbit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EARTH_MOON: f64 = 0.012150585609624;

    fn catalog_json() -> String {
        format!(
            r#"{{ "entries": [
                {{ "mass_ratio": {mu}, "family": "Halo", "point": "L1", "amplitude": 0.02,
                   "state": [0.8234, 0.0, -0.0223, 0.0, 0.1342, 0.0], "period": 2.7430 }},
                {{ "mass_ratio": {mu}, "family": "Halo", "point": "L1", "amplitude": 0.08,
                   "state": [0.8280, 0.0, -0.0800, 0.0, 0.1800, 0.0], "period": 2.7700 }},
                {{ "mass_ratio": {mu}, "family": "Lyapunov", "point": "L1", "amplitude": 0.01,
                   "state": [0.8269, 0.0, 0.0, 0.0, 0.0800, 0.0], "period": 2.6920 }},
                {{ "mass_ratio": 3.0e-6, "family": "Halo", "point": "L1", "amplitude": 0.001,
                   "state": [0.9890, 0.0, 0.0010, 0.0, 0.0090, 0.0], "period": 3.0600 }}
            ] }}"#,
            mu = EARTH_MOON
        )
    }

    fn assert_err_contains<T: fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error containing {needle:?}, got {message:?}"
        );
    }

    fn mu() -> MassRatio {
        MassRatio::new(EARTH_MOON).expect("valid mass ratio")
    }

    #[test]
    fn finds_nearest_family_member() {
        let catalog = OrbitCatalog::from_json(&catalog_json()).expect("catalog");
        assert_eq!(catalog.len(), 4);

        let orbit = catalog
            .find_periodic_orbit(mu(), OrbitFamily::Halo, LibrationPoint::L1, Some(0.06))
            .expect("halo orbit");
        assert_eq!(orbit.period, 2.77);

        let smallest = catalog
            .find_periodic_orbit(mu(), OrbitFamily::Halo, LibrationPoint::L1, None)
            .expect("halo orbit");
        assert_eq!(smallest.period, 2.743);

        let lyapunov = catalog
            .find_periodic_orbit(mu(), OrbitFamily::Lyapunov, LibrationPoint::L1, Some(1.0))
            .expect("lyapunov orbit");
        assert_eq!(lyapunov.state[4], 0.08);
    }

    #[test]
    fn missing_family_and_bad_input_are_errors() {
        let catalog = OrbitCatalog::from_json(&catalog_json()).expect("catalog");
        assert_err_contains(
            catalog.find_periodic_orbit(mu(), OrbitFamily::Vertical, LibrationPoint::L2, None),
            "No L2 vertical orbits",
        );
        assert_err_contains(
            catalog.find_periodic_orbit(mu(), OrbitFamily::Halo, LibrationPoint::L1, Some(f64::NAN)),
            "finite",
        );
        assert_err_contains(OrbitCatalog::from_json("{ \"entries\": 3 }"), "parse");
        assert_err_contains(
            OrbitCatalog::from_json(
                r#"{ "entries": [ { "mass_ratio": 0.7, "family": "Halo", "point": "L1",
                   "amplitude": 0.1, "state": [0, 0, 0, 0, 0, 0], "period": 1.0 } ] }"#,
            ),
            "mass ratio",
        );
    }

    #[test]
    fn rejects_invalid_periods_and_round_trips_json() {
        let mut catalog = OrbitCatalog::default();
        let entry = CatalogEntry {
            mass_ratio: mu(),
            family: OrbitFamily::Lyapunov,
            point: LibrationPoint::L2,
            amplitude: 0.01,
            state: [1.17, 0.0, 0.0, 0.0, -0.09, 0.0],
            period: -3.4,
        };
        assert_err_contains(catalog.push(entry.clone()), "period");
        catalog
            .push(CatalogEntry {
                period: 3.4,
                ..entry
            })
            .expect("valid entry");
        let restored = OrbitCatalog::from_json(&catalog.to_json().expect("json")).expect("parse");
        assert_eq!(restored, catalog);
    }
}
