use rollcall_core::{Deadline, RepeatPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_BREVO_API_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Ledger(#[from] rollcall_core::ConfigError),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameSourceKind {
    /// Server-side V4L2 capture loop with a live MJPEG stream.
    #[default]
    Camera,
    /// Clients push encoded stills to `POST /detect`.
    Upload,
}

impl FromStr for FrameSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "camera" => Ok(Self::Camera),
            "upload" => Ok(Self::Upload),
            other => Err(ConfigError::Invalid {
                key: "frame_source",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FrameSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Camera => "camera",
            Self::Upload => "upload",
        })
    }
}

/// Brevo transactional email settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub sender_name: String,
    pub sender_email: Option<String>,
    pub recipients: Vec<String>,
}

/// Daemon configuration: optional TOML file, overridden by `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP server.
    pub bind: String,
    pub frame_source: FrameSourceKind,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model and its labels file.
    pub model_dir: PathBuf,
    pub model_file: String,
    pub labels_file: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// First sightings after this time of day are late.
    pub deadline: Deadline,
    pub repeat_policy: RepeatPolicy,
    /// Directory that receives `attendance_<date>.csv` exports.
    pub export_dir: PathBuf,
    /// Number of HTTP worker threads (MJPEG viewers get their own threads).
    pub http_workers: usize,
    pub jpeg_quality: u8,
    /// TrueType font for detection captions on the video stream.
    pub font_path: Option<PathBuf>,
    pub mail: MailConfig,
}

/// On-disk shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    frame_source: Option<String>,
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    model_file: Option<String>,
    labels_file: Option<String>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    deadline: Option<String>,
    repeat_policy: Option<String>,
    export_dir: Option<PathBuf>,
    http_workers: Option<usize>,
    jpeg_quality: Option<u8>,
    font_path: Option<PathBuf>,
    mail: FileMailConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileMailConfig {
    api_key: Option<String>,
    api_url: Option<String>,
    sender_name: Option<String>,
    sender_email: Option<String>,
    recipients: Option<Vec<String>>,
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    /// Merge file values and environment lookups over the built-in defaults.
    fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, file_value: Option<String>, default: &str| -> String {
            env(key)
                .or(file_value)
                .unwrap_or_else(|| default.to_string())
        };

        let deadline = match env("ROLLCALL_DEADLINE").or(file.deadline) {
            Some(v) => v.parse()?,
            None => Deadline::default(),
        };
        let repeat_policy = match env("ROLLCALL_REPEAT_POLICY").or(file.repeat_policy) {
            Some(v) => v.parse()?,
            None => RepeatPolicy::default(),
        };
        let frame_source = match env("ROLLCALL_FRAME_SOURCE").or(file.frame_source) {
            Some(v) => v.parse()?,
            None => FrameSourceKind::default(),
        };

        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(rollcall_core::default_model_dir);

        let recipients = match env("ROLLCALL_MAIL_RECIPIENTS") {
            Some(list) => split_list(&list),
            None => file.mail.recipients.unwrap_or_default(),
        };

        let http_workers = number(&env, "ROLLCALL_HTTP_WORKERS", file.http_workers, 4)?;
        if http_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "http_workers",
                value: "0".into(),
            });
        }

        let jpeg_quality = number(&env, "ROLLCALL_JPEG_QUALITY", file.jpeg_quality, 80)?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "jpeg_quality",
                value: jpeg_quality.to_string(),
            });
        }

        let confidence_threshold = unit_interval(
            "confidence_threshold",
            number(
                &env,
                "ROLLCALL_CONFIDENCE_THRESHOLD",
                file.confidence_threshold,
                rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            )?,
        )?;
        let iou_threshold = unit_interval(
            "iou_threshold",
            number(
                &env,
                "ROLLCALL_IOU_THRESHOLD",
                file.iou_threshold,
                rollcall_core::detector::DEFAULT_IOU_THRESHOLD,
            )?,
        )?;

        Ok(Self {
            bind: text("ROLLCALL_BIND", file.bind, "127.0.0.1:5000"),
            frame_source,
            camera_device: text("ROLLCALL_CAMERA_DEVICE", file.camera_device, "/dev/video0"),
            model_dir,
            model_file: text("ROLLCALL_MODEL_FILE", file.model_file, "best.onnx"),
            labels_file: text("ROLLCALL_LABELS_FILE", file.labels_file, "labels.txt"),
            confidence_threshold,
            iou_threshold,
            deadline,
            repeat_policy,
            export_dir: env("ROLLCALL_EXPORT_DIR")
                .map(PathBuf::from)
                .or(file.export_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            http_workers,
            jpeg_quality,
            font_path: env("ROLLCALL_FONT_PATH")
                .map(PathBuf::from)
                .or(file.font_path),
            mail: MailConfig {
                api_key: env("ROLLCALL_BREVO_API_KEY")
                    .or(file.mail.api_key)
                    .filter(|k| !k.is_empty()),
                api_url: text("ROLLCALL_BREVO_API_URL", file.mail.api_url, DEFAULT_BREVO_API_URL),
                sender_name: text(
                    "ROLLCALL_MAIL_SENDER_NAME",
                    file.mail.sender_name,
                    "Attendance System",
                ),
                sender_email: env("ROLLCALL_MAIL_SENDER_EMAIL").or(file.mail.sender_email),
                recipients,
            },
        })
    }

    /// Path to the ONNX detection model.
    pub fn model_path(&self) -> String {
        self.model_dir
            .join(&self.model_file)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the class-name list.
    pub fn labels_path(&self) -> String {
        self.model_dir
            .join(&self.labels_file)
            .to_string_lossy()
            .into_owned()
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

fn number<T, F>(env: &F, key: &'static str, file_value: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(file_value.unwrap_or(default)),
    }
}

/// Thresholds are probabilities; NaN is rejected along with anything outside `[0, 1]`.
fn unit_interval(key: &'static str, value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5000");
        assert_eq!(cfg.frame_source, FrameSourceKind::Camera);
        assert_eq!(cfg.deadline.to_string(), "09:00");
        assert_eq!(cfg.repeat_policy, RepeatPolicy::FirstWins);
        assert_eq!(cfg.http_workers, 4);
        assert_eq!(cfg.jpeg_quality, 80);
        assert_eq!(cfg.mail.api_url, DEFAULT_BREVO_API_URL);
        assert_eq!(cfg.mail.sender_name, "Attendance System");
        assert!(cfg.mail.api_key.is_none());
        assert!(cfg.model_path().ends_with("best.onnx"));
        assert!(cfg.labels_path().ends_with("labels.txt"));
    }

    #[test]
    fn test_file_values() {
        let file: FileConfig = toml::from_str(
            r#"
            deadline = "08:30"
            repeat_policy = "last-wins"
            frame_source = "upload"
            model_dir = "/opt/models"

            [mail]
            api_key = "xkeysib-123"
            sender_email = "attendance@example.com"
            recipients = ["head@example.com", "office@example.com"]
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(file, env_of(&[])).unwrap();
        assert_eq!(cfg.deadline.to_string(), "08:30");
        assert_eq!(cfg.repeat_policy, RepeatPolicy::LastWins);
        assert_eq!(cfg.frame_source, FrameSourceKind::Upload);
        assert_eq!(cfg.model_path(), "/opt/models/best.onnx");
        assert_eq!(cfg.mail.api_key.as_deref(), Some("xkeysib-123"));
        assert_eq!(cfg.mail.recipients.len(), 2);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str("deadline = \"08:30\"\nhttp_workers = 2").unwrap();
        let cfg = Config::resolve(
            file,
            env_of(&[
                ("ROLLCALL_DEADLINE", "10:15"),
                ("ROLLCALL_MAIL_RECIPIENTS", "a@example.com, b@example.com,"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.deadline.to_string(), "10:15");
        assert_eq!(cfg.http_workers, 2);
        assert_eq!(cfg.mail.recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_deadline = Config::resolve(FileConfig::default(), env_of(&[("ROLLCALL_DEADLINE", "nine")]));
        assert!(matches!(bad_deadline, Err(ConfigError::Ledger(_))));

        let bad_source = Config::resolve(FileConfig::default(), env_of(&[("ROLLCALL_FRAME_SOURCE", "rtsp")]));
        assert!(matches!(bad_source, Err(ConfigError::Invalid { key: "frame_source", .. })));

        let bad_workers = Config::resolve(FileConfig::default(), env_of(&[("ROLLCALL_HTTP_WORKERS", "0")]));
        assert!(matches!(bad_workers, Err(ConfigError::Invalid { key: "http_workers", .. })));

        let bad_threshold = Config::resolve(
            FileConfig::default(),
            env_of(&[("ROLLCALL_CONFIDENCE_THRESHOLD", "high")]),
        );
        assert!(matches!(bad_threshold, Err(ConfigError::Invalid { .. })));

        for (var, key) in [
            ("ROLLCALL_CONFIDENCE_THRESHOLD", "confidence_threshold"),
            ("ROLLCALL_IOU_THRESHOLD", "iou_threshold"),
        ] {
            for raw in ["NaN", "-3", "-0.1", "1.5", "inf"] {
                let result = Config::resolve(FileConfig::default(), env_of(&[(var, raw)]));
                assert!(
                    matches!(result, Err(ConfigError::Invalid { key: k, .. }) if k == key),
                    "{var}={raw} should be rejected"
                );
            }
            for raw in ["0", "0.5", "1"] {
                assert!(Config::resolve(FileConfig::default(), env_of(&[(var, raw)])).is_ok());
            }
        }

        let file: FileConfig = toml::from_str("iou_threshold = 2.0").unwrap();
        assert!(matches!(
            Config::resolve(file, env_of(&[])),
            Err(ConfigError::Invalid { key: "iou_threshold", .. })
        ));
    }

    #[test]
    fn test_empty_api_key_disables_mail() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[("ROLLCALL_BREVO_API_KEY", "")])).unwrap();
        assert!(cfg.mail.api_key.is_none());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("dedline = \"09:00\"").is_err());
    }
}
