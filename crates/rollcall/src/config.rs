use rollcall_core::{DetectParams, FaceSelection, CANONICAL_SIZE, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Attendance system configuration.
///
/// Resolved from defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the Haar cascade: an OpenCV `.xml` file or the JSON form.
    pub cascade_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Side length of stored and compared templates.
    pub template_size: u32,
    /// Mean pixel difference below which two templates match.
    pub match_threshold: f32,
    /// Detector window growth per scale step.
    pub scale_factor: f32,
    /// Raw hits a detection needs beyond this count to be kept.
    pub min_neighbors: u32,
    /// Smallest face side in pixels; 0 uses the cascade window.
    pub min_face_size: u32,
    /// Which face to sample when a frame holds several.
    pub face_selection: FaceSelection,
    /// Frames to try before giving up on finding a face.
    pub capture_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("attendance.db"),
            cascade_path: default_cascade_path(&data_dir),
            camera_device: "/dev/video0".to_string(),
            template_size: CANONICAL_SIZE,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            scale_factor: 1.3,
            min_neighbors: 5,
            min_face_size: 0,
            face_selection: FaceSelection::First,
            capture_attempts: 30,
        }
    }
}

impl Config {
    /// Load configuration from the file named by `ROLLCALL_CONFIG` (if set)
    /// and `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `ROLLCALL_*` variables supplied by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_CASCADE_PATH") {
            self.cascade_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&lookup, "ROLLCALL_TEMPLATE_SIZE", &mut self.template_size)?;
        env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold)?;
        env_parse(&lookup, "ROLLCALL_SCALE_FACTOR", &mut self.scale_factor)?;
        env_parse(&lookup, "ROLLCALL_MIN_NEIGHBORS", &mut self.min_neighbors)?;
        env_parse(&lookup, "ROLLCALL_MIN_FACE_SIZE", &mut self.min_face_size)?;
        env_parse(&lookup, "ROLLCALL_FACE_SELECTION", &mut self.face_selection)?;
        env_parse(&lookup, "ROLLCALL_CAPTURE_ATTEMPTS", &mut self.capture_attempts)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.template_size == 0 {
            return Err(ConfigError::Invalid("template_size must be non-zero".into()));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be above 1, got {}",
                self.scale_factor
            )));
        }
        if self.capture_attempts == 0 {
            return Err(ConfigError::Invalid("capture_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Detector tuning derived from this configuration.
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_face_size,
        }
    }
}

/// File name OpenCV ships its frontal-face cascade under.
pub const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Where distribution OpenCV packages install their cascades.
const OPENCV_CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/local/share/opencv/haarcascades",
];

/// The cascade in the data dir if present, else the first OpenCV install
/// that has one, else the data dir path so errors name where to put it.
fn default_cascade_path(data_dir: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = OPENCV_CASCADE_DIRS.iter().map(PathBuf::from).collect();
    find_cascade(data_dir, &dirs)
}

fn find_cascade(data_dir: &Path, system_dirs: &[PathBuf]) -> PathBuf {
    let local = data_dir.join(CASCADE_FILE);
    if local.is_file() {
        return local;
    }
    system_dirs
        .iter()
        .map(|dir| dir.join(CASCADE_FILE))
        .find(|path| path.is_file())
        .unwrap_or(local)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.clone(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.template_size, 100);
        assert_eq!(c.match_threshold, 50.0);
        assert_eq!(c.scale_factor, 1.3);
        assert_eq!(c.min_neighbors, 5);
        assert_eq!(c.face_selection, FaceSelection::First);
        assert!(c.db_path.ends_with("rollcall/attendance.db"));
        assert!(c.cascade_path.ends_with(CASCADE_FILE));
        c.validate().unwrap();
    }

    #[test]
    fn test_cascade_search_order() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        let opencv = root.path().join("opencv4/haarcascades");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&opencv).unwrap();
        let dirs = vec![root.path().join("missing"), opencv.clone()];

        // Nothing installed: point at the data dir.
        assert_eq!(find_cascade(&data, &dirs), data.join(CASCADE_FILE));

        std::fs::write(opencv.join(CASCADE_FILE), "<opencv_storage/>").unwrap();
        assert_eq!(find_cascade(&data, &dirs), opencv.join(CASCADE_FILE));

        std::fs::write(data.join(CASCADE_FILE), "<opencv_storage/>").unwrap();
        assert_eq!(find_cascade(&data, &dirs), data.join(CASCADE_FILE));
    }

    #[test]
    fn test_toml_overrides_some_fields() {
        let c = Config::from_toml_str(
            r#"
            db_path = "/var/lib/rollcall/attendance.db"
            match_threshold = 35.5
            face_selection = "largest"
            "#,
        )
        .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/var/lib/rollcall/attendance.db"));
        assert_eq!(c.match_threshold, 35.5);
        assert_eq!(c.face_selection, FaceSelection::Largest);
        assert_eq!(c.template_size, 100);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(matches!(
            Config::from_toml_str("threshold = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(lookup_from(&[
            ("ROLLCALL_DB_PATH", "/tmp/x.db"),
            ("ROLLCALL_MIN_NEIGHBORS", "3"),
            ("ROLLCALL_SCALE_FACTOR", " 1.1 "),
            ("ROLLCALL_FACE_SELECTION", "largest"),
        ]))
        .unwrap();
        assert_eq!(c.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(c.min_neighbors, 3);
        assert_eq!(c.scale_factor, 1.1);
        assert_eq!(c.face_selection, FaceSelection::Largest);
    }

    #[test]
    fn test_env_bad_number() {
        let mut c = Config::default();
        let err = c
            .apply_env(lookup_from(&[("ROLLCALL_TEMPLATE_SIZE", "big")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ROLLCALL_TEMPLATE_SIZE"));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let c = Config { scale_factor: 1.0, ..Config::default() };
        assert!(c.validate().is_err());
        let c = Config { template_size: 0, ..Config::default() };
        assert!(c.validate().is_err());
        let c = Config { match_threshold: 0.0, ..Config::default() };
        assert!(c.validate().is_err());
        let c = Config { capture_attempts: 0, ..Config::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_detect_params() {
        let c = Config { min_face_size: 60, ..Config::default() };
        let p = c.detect_params();
        assert_eq!(p.min_size, 60);
        assert_eq!(p.min_neighbors, 5);
        assert_eq!(p.scale_factor, 1.3);
    }
}
