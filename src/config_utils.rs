use deinterlace::settings::{KEY_DEINTERLACER, KEY_FIELD_ORDER};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Extensions `collect_frames` picks up from directories.
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff"];

/// Watches a settings file and yields its contents when they change.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current: Option<Value>,
}

impl ConfigWatcher {
    /// Create a new config watcher if a path is provided.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch config file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching config file {:?} for changes", path);

                let current = load_settings(Some(&path)).ok();
                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    current,
                })
            }
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                None
            }
        }
    }

    /// Returns the new settings if the file was modified and its contents differ.
    pub fn check_for_changes(&mut self) -> Option<Value> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    needs_reload = true;
                }
            }
        }

        if !needs_reload {
            return None;
        }

        info!("Config file changed, checking for updates...");
        match load_settings(Some(&self.path)) {
            Ok(settings) if self.current.as_ref() == Some(&settings) => None,
            Ok(settings) => {
                self.current = Some(settings.clone());
                Some(settings)
            }
            Err(e) => {
                error!("Failed to reload config: {:#}", e);
                None
            }
        }
    }
}

/// Reads a YAML settings mapping. No path means no user settings.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Null);
    };
    let content = fs::read_to_string(path)?;
    let settings = serde_yaml::from_str(&content)?;
    Ok(settings)
}

/// Layers command-line overrides on top of file settings.
pub fn apply_overrides(settings: &mut Value, deinterlacer: Option<&str>, field_order: Option<bool>) {
    if deinterlacer.is_none() && field_order.is_none() {
        return;
    }
    if settings.is_null() {
        *settings = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = settings else {
        warn!("Settings are not a mapping, ignoring command-line overrides");
        return;
    };
    if let Some(name) = deinterlacer {
        map.insert(KEY_DEINTERLACER.into(), name.into());
    }
    if let Some(flag) = field_order {
        map.insert(KEY_FIELD_ORDER.into(), flag.into());
    }
}

/// Expands directories into their image files, sorted by name. Files are kept in the given order.
pub fn collect_frames(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for path in paths {
        if !path.is_dir() {
            frames.push(path.clone());
            continue;
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_frame_file(p))
            .collect();
        entries.sort();
        info!("Found {} frames in {:?}", entries.len(), path);
        frames.extend(entries);
    }
    Ok(frames)
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
