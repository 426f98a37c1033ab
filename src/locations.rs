//! Named-location table with rectangular-grid slot indexing.
//!
//! A location file is a YAML mapping from name to entry:
//!
//! ```yaml
//! rack:
//!   x_origin: 10.0
//!   y_origin: 20.0
//!   z_origin: 0.0
//!   num_x: 4
//!   x_offset: 9.0
//!   num_y: 2
//!   y_offset: 9.0
//! ```
//!
//! One named fixture can then describe many physical slots: index `i`
//! resolves to column `i % num_x`, row `i / num_x` offset from the origin.
//! A missing or malformed file degrades to an empty table so driver
//! construction never fails on configuration; lookups against the empty
//! table report [`Error::UnknownLocation`].

use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One named location: a grid origin plus the grid's shape.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LocationEntry {
    /// X of the grid origin (slot 0).
    pub x_origin: f64,
    /// Y of the grid origin (slot 0).
    pub y_origin: f64,
    /// Z shared by every slot in the grid.
    pub z_origin: f64,
    /// Number of columns; slot indices wrap every `num_x`.
    pub num_x: usize,
    /// X spacing between adjacent columns.
    pub x_offset: f64,
    /// Number of rows.
    pub num_y: usize,
    /// Y spacing between adjacent rows.
    pub y_offset: f64,
}

impl LocationEntry {
    fn validate(&self, name: &str) -> Result<()> {
        if self.num_x == 0 || self.num_y == 0 {
            return Err(Error::Config(format!(
                "location '{}': grid dimensions must be at least 1x1 (got {}x{})",
                name, self.num_x, self.num_y
            )));
        }
        Ok(())
    }

    /// Absolute coordinate of grid slot `index`; `None` yields the raw
    /// origin.
    pub fn slot(&self, index: Option<usize>) -> (f64, f64, f64) {
        match index {
            None => (self.x_origin, self.y_origin, self.z_origin),
            Some(i) => {
                let col = i % self.num_x;
                let row = i / self.num_x;
                (
                    self.x_origin + col as f64 * self.x_offset,
                    self.y_origin + row as f64 * self.y_offset,
                    self.z_origin,
                )
            }
        }
    }
}

/// Read-only table of named locations, loaded once at driver construction.
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    entries: HashMap<String, LocationEntry>,
}

impl LocationTable {
    /// An empty table; every lookup fails with `UnknownLocation`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from in-memory entries, validating each.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, LocationEntry)>,
    {
        let entries: HashMap<String, LocationEntry> = entries.into_iter().collect();
        for (name, entry) in &entries {
            entry.validate(name)?;
        }
        Ok(Self { entries })
    }

    /// Loads the table from an optional YAML file path.
    ///
    /// Every failure path (no path configured, unreadable file, parse
    /// error, invalid entry) is recovered locally: the problem is logged
    /// and an empty table is returned.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("no locations file configured; location table is empty");
            return Self::empty();
        };
        match Self::try_load(path) {
            Ok(table) => {
                info!(
                    "loaded {} locations from {}",
                    table.len(),
                    path.display()
                );
                table
            }
            Err(e) => {
                error!(
                    "failed to load locations from {}: {}; location table is empty",
                    path.display(),
                    e
                );
                Self::empty()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        // An empty document parses as null, which is a valid empty table.
        let entries: Option<HashMap<String, LocationEntry>> = serde_yaml::from_str(&text)?;
        Self::from_entries(entries.unwrap_or_default())
    }

    /// Number of named locations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no locations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a raw entry by name.
    pub fn get(&self, name: &str) -> Option<&LocationEntry> {
        self.entries.get(name)
    }

    /// Resolves `name` (and optional grid `index`) to an absolute
    /// coordinate.
    ///
    /// # Errors
    /// Returns [`Error::UnknownLocation`] when the name is not in the
    /// table.
    pub fn resolve(&self, name: &str, index: Option<usize>) -> Result<(f64, f64, f64)> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::UnknownLocation(name.to_string()))?;
        let (x, y, z) = entry.slot(index);
        debug!(
            "resolved location '{}'[{:?}] -> X{:.3} Y{:.3} Z{:.3}",
            name, index, x, y, z
        );
        Ok((x, y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn rack() -> LocationEntry {
        LocationEntry {
            x_origin: 10.0,
            y_origin: 20.0,
            z_origin: 0.0,
            num_x: 4,
            x_offset: 9.0,
            num_y: 2,
            y_offset: 9.0,
        }
    }

    fn table_with_rack() -> LocationTable {
        LocationTable::from_entries([("rack".to_string(), rack())]).unwrap()
    }

    #[test]
    fn test_resolve_without_index_returns_origin() {
        let table = table_with_rack();
        assert_eq!(table.resolve("rack", None).unwrap(), (10.0, 20.0, 0.0));
    }

    #[test]
    fn test_resolve_grid_index() {
        let table = table_with_rack();
        // index 5 on a 4-wide grid: column 1, row 1
        assert_eq!(table.resolve("rack", Some(5)).unwrap(), (19.0, 29.0, 0.0));
        // slot 0 is the origin itself
        assert_eq!(table.resolve("rack", Some(0)).unwrap(), (10.0, 20.0, 0.0));
        // last column of the first row
        assert_eq!(table.resolve("rack", Some(3)).unwrap(), (37.0, 20.0, 0.0));
    }

    #[test]
    fn test_resolve_matches_row_col_decomposition() {
        let table = table_with_rack();
        let entry = rack();
        for row in 0..entry.num_y {
            for col in 0..entry.num_x {
                let index = row * entry.num_x + col;
                let (x, y, z) = table.resolve("rack", Some(index)).unwrap();
                assert_eq!(x, entry.x_origin + col as f64 * entry.x_offset);
                assert_eq!(y, entry.y_origin + row as f64 * entry.y_offset);
                assert_eq!(z, entry.z_origin);
            }
        }
    }

    #[test]
    fn test_unknown_location_is_an_error() {
        let table = table_with_rack();
        assert!(matches!(
            table.resolve("nowhere", None),
            Err(Error::UnknownLocation(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_zero_width_grid_fails_validation() {
        let mut entry = rack();
        entry.num_x = 0;
        let result = LocationTable::from_entries([("bad".to_string(), entry)]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_file_yields_empty_table() {
        let table = LocationTable::load(Some(Path::new("/nonexistent/locations.yaml")));
        assert!(table.is_empty());
        assert!(matches!(
            table.resolve("rack", None),
            Err(Error::UnknownLocation(_))
        ));
    }

    #[test]
    fn test_load_no_path_yields_empty_table() {
        assert!(LocationTable::load(None).is_empty());
    }

    #[test]
    fn test_load_malformed_file_yields_empty_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rack: [not, a, mapping]").unwrap();
        let table = LocationTable::load(Some(file.path()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "rack:\n",
                "  x_origin: 10.0\n",
                "  y_origin: 20.0\n",
                "  z_origin: 0.0\n",
                "  num_x: 4\n",
                "  x_offset: 9.0\n",
                "  num_y: 2\n",
                "  y_offset: 9.0\n",
                "park:\n",
                "  x_origin: 0.0\n",
                "  y_origin: 140.0\n",
                "  z_origin: -1.0\n",
                "  num_x: 1\n",
                "  x_offset: 0.0\n",
                "  num_y: 1\n",
                "  y_offset: 0.0\n",
            )
        )
        .unwrap();

        let table = LocationTable::load(Some(file.path()));
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("rack", Some(5)).unwrap(), (19.0, 29.0, 0.0));
        assert_eq!(table.resolve("park", None).unwrap(), (0.0, 140.0, -1.0));
    }

    #[test]
    fn test_load_empty_file_yields_empty_table() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let table = LocationTable::load(Some(file.path()));
        assert!(table.is_empty());
    }
}
