use std::path::{Path, PathBuf};

use anyhow::Context;

/// Where instrument names and their raw audio bytes come from.
///
/// `sample_map` order defines row order for the whole session.
pub trait SampleSource: Sync {
    fn sample_map(&self) -> anyhow::Result<Vec<(String, String)>>;
    fn fetch(&self, filename: &str) -> anyhow::Result<Vec<u8>>;
}

pub const SAMPLE_MAP_FILE: &str = "samples.json";

/// Samples served from a local directory.
///
/// `<root>/samples.json` maps instrument name to file name, e.g.
/// `{"Kick": "kick-classic.wav", "Snare": "snare-808.wav"}`. Without it every
/// `*.wav` in the directory becomes an instrument named after its file stem.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_map_file(&self, path: &Path) -> anyhow::Result<Vec<(String, String)>> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;

        map.into_iter()
            .map(|(name, file)| match file {
                serde_json::Value::String(file) => Ok((name, file)),
                other => anyhow::bail!("sample `{name}` maps to {other}, expected a file name"),
            })
            .collect()
    }

    fn index_wav_files(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut files: Vec<String> = std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            })
            .filter_map(|path| path.file_name()?.to_str().map(str::to_owned))
            .collect();
        files.sort();

        Ok(files
            .into_iter()
            .map(|file| {
                let name = Path::new(&file)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&file)
                    .to_string();
                (name, file)
            })
            .collect())
    }
}

impl SampleSource for DirectorySource {
    fn sample_map(&self) -> anyhow::Result<Vec<(String, String)>> {
        let map_path = self.root.join(SAMPLE_MAP_FILE);
        if map_path.exists() {
            self.read_map_file(&map_path)
        } else {
            self.index_wav_files()
        }
    }

    fn fetch(&self, filename: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(filename);
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Display form of an instrument name: `Perc_Hollow` becomes `Perc (Hollow)`.
pub fn format_sample_name(name: &str) -> String {
    match name.split_once('_') {
        Some((head, rest)) => format!("{} ({})", head, rest.replace('_', " ")),
        None => name.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(label: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let dir = std::env::temp_dir().join(format!(
        "beatgrid-{label}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
