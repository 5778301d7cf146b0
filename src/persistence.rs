// Saves the pattern between sessions so the grid comes back as it was left
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sequencer::Grid;

const BEATGRID_DIR: &str = ".beatgrid";
pub const DEFAULT_PATTERN: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPattern {
    pub grid: Vec<Vec<bool>>,
    pub tempo: f32,
    pub columns: usize,
}

impl SavedPattern {
    pub fn capture(grid: &Grid, tempo: f32) -> Self {
        Self {
            grid: grid.to_rows(),
            tempo,
            columns: grid.columns(),
        }
    }

    /// Rebuilds a grid with `rows` instruments; saved rows beyond that are dropped.
    pub fn to_grid(&self, rows: usize) -> Grid {
        Grid::restore(rows, self.columns, &self.grid)
    }
}

// <dir>/.beatgrid/<name>.json
fn pattern_file_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(BEATGRID_DIR).join(format!("{name}.json"))
}

pub fn load_pattern(dir: &Path, name: &str) -> Option<SavedPattern> {
    let path = pattern_file_path(dir, name);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            log::warn!("ignoring unreadable pattern {}: {e}", path.display());
            None
        }
    }
}

// creates .beatgrid/ if needed
pub fn save_pattern(dir: &Path, name: &str, pattern: &SavedPattern) -> anyhow::Result<()> {
    let path = pattern_file_path(dir, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(pattern)?;
    std::fs::write(&path, json)?;
    log::debug!("saved pattern to {}", path.display());
    Ok(())
}

pub fn remove_pattern(dir: &Path, name: &str) -> anyhow::Result<()> {
    let path = pattern_file_path(dir, name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scratch_dir;

    #[test]
    fn test_save_and_load() {
        let dir = scratch_dir("persist");
        let grid = Grid::new(3, 4).toggled(0, 0).toggled(2, 3);
        let pattern = SavedPattern::capture(&grid, 96.0);
        save_pattern(&dir, DEFAULT_PATTERN, &pattern).unwrap();

        assert!(dir.join(".beatgrid/default.json").exists());
        let loaded = load_pattern(&dir, DEFAULT_PATTERN).unwrap();
        assert_eq!(loaded, pattern);
        assert_eq!(loaded.to_grid(3), grid);
    }

    #[test]
    fn test_restore_with_fewer_rows() {
        let grid = Grid::new(3, 4).toggled(2, 1).toggled(0, 1);
        let restored = SavedPattern::capture(&grid, 120.0).to_grid(2);
        assert_eq!(restored.rows(), 2);
        assert!(restored.is_active(0, 1));
    }

    #[test]
    fn test_missing_or_corrupt_is_none() {
        let dir = scratch_dir("persist-bad");
        assert!(load_pattern(&dir, "nothing").is_none());

        std::fs::create_dir_all(dir.join(BEATGRID_DIR)).unwrap();
        std::fs::write(dir.join(BEATGRID_DIR).join("broken.json"), "{ not json").unwrap();
        assert!(load_pattern(&dir, "broken").is_none());
    }

    #[test]
    fn test_remove_pattern() {
        let dir = scratch_dir("persist-rm");
        let pattern = SavedPattern::capture(&Grid::new(1, 8), 120.0);
        save_pattern(&dir, "a", &pattern).unwrap();
        remove_pattern(&dir, "a").unwrap();
        assert!(load_pattern(&dir, "a").is_none());
        // removing twice is fine
        remove_pattern(&dir, "a").unwrap();
    }
}
