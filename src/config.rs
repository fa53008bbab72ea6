//! # Configuration Management
//!
//! Loads the service configuration from several layers, lowest priority first:
//! 1. Default values (the `Default` impl below)
//! 2. A configuration file (`config.toml` by default, missing is fine)
//! 3. Environment variables with the `APP_` prefix, `__` between sections
//!    (`APP_SINK__PROGRAM="aplay -q -t raw"`, `APP_SERVER__URI=tcp://0.0.0.0:10601`)
//! 4. Command-line flags
//!
//! Values from `.env` are loaded into the environment by `main` before this runs.
//!
//! ## Sections:
//! - **server**: where to listen for clients
//! - **sink**: the playback program and the audio format it expects
//! - **logging**: verbosity

use crate::audio::converter::validate_format; // Same format rules the converter enforces
use crate::audio::format::AudioFormat; // rate / width / channels triple
use crate::playback::command::split_command_line; // Shell-style argv splitting
use crate::server::ServerUri; // Parsed listen address
use anyhow::{Context, Result}; // Startup errors with context
use clap::Parser; // Derive-based command-line parsing
use serde::{Deserialize, Serialize}; // For converting to/from TOML, env and CLI layers

/// Command-line flags. Every flag is optional so the lower layers can supply it.
#[derive(Parser, Debug)]
#[command(name = "wyoming-snd-external")]
#[command(about = "Wyoming sound service that plays audio through an external program")]
#[command(version)]
pub struct CliArgs {
    /// Program to run, receiving raw PCM on stdin (e.g. "aplay -r 22050 -c 1 -f S16_LE -t raw")
    #[arg(long)]
    pub program: Option<String>,

    /// Sample rate the program expects in Hz (required, here or in config/env)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Sample width the program expects in bytes (required, here or in config/env)
    #[arg(long)]
    pub width: Option<u16>,

    /// Channel count the program expects (required, here or in config/env)
    #[arg(long)]
    pub channels: Option<u16>,

    /// Largest number of frames written to the program at once
    #[arg(long)]
    pub samples_per_chunk: Option<usize>,

    /// Where to listen: stdio://, tcp://host:port or unix://path
    #[arg(long)]
    pub uri: Option<String>,

    /// Log DEBUG messages
    #[arg(long)]
    pub debug: bool,

    /// Configuration file name (extension optional)
    #[arg(long, default_value = "config")]
    pub config: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

/// ## Fields:
/// - `uri`: `stdio://` (one session on stdin/stdout), `tcp://host:port` or `unix://path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub uri: String,
}

/// The external playback program and its input format.
///
/// ## Fields:
/// - `program`: full command line, split with shell-like quoting rules
/// - `rate` / `width` / `channels`: the raw PCM format written to its stdin
///   (0 means "not set"; `validate` refuses to start until all three are given)
/// - `samples_per_chunk`: cap on frames per individual write
///
/// ## Rust Concepts:
/// - **u32 / u16**: unsigned, so a negative rate cannot even be represented
/// - **usize**: platform-sized, used because it becomes a slice length
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub program: String,
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
    pub samples_per_chunk: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                uri: "stdio://".to_string(),
            },
            sink: SinkConfig {
                program: String::new(), // Must be supplied
                rate: 0,                // Must be supplied
                width: 0,               // Must be supplied
                channels: 0,            // Must be supplied
                samples_per_chunk: 1024,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all layers.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SINK__PROGRAM="paplay --raw"`: sink command line
    /// - `APP_SINK__RATE=16000`: sink sample rate
    /// - `APP_LOGGING__DEBUG=true`: debug logging
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(&args.config).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(program) = &args.program {
            settings = settings.set_override("sink.program", program.as_str())?;
        }
        if let Some(rate) = args.rate {
            settings = settings.set_override("sink.rate", i64::from(rate))?;
        }
        if let Some(width) = args.width {
            settings = settings.set_override("sink.width", i64::from(width))?;
        }
        if let Some(channels) = args.channels {
            settings = settings.set_override("sink.channels", i64::from(channels))?;
        }
        if let Some(samples) = args.samples_per_chunk {
            let samples = i64::try_from(samples).context("samples-per-chunk is too large")?;
            settings = settings.set_override("sink.samples_per_chunk", samples)?;
        }
        if let Some(uri) = &args.uri {
            settings = settings.set_override("server.uri", uri.as_str())?;
        }
        if args.debug {
            settings = settings.set_override("logging.debug", true)?;
        }

        let config = settings
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    /// Check that the service can start with these values.
    ///
    /// ## What this checks:
    /// - The sink program is set and splits into at least one word
    /// - The sink rate, width and channels were all given
    /// - The sink format is playable (width 1..=4)
    /// - `samples_per_chunk` is non-zero
    /// - The server URI has a supported scheme
    ///
    /// ## Why validate:
    /// A wrong format does not fail loudly later; the sink just plays noise.
    pub fn validate(&self) -> Result<()> {
        self.sink_command()?;

        // Guessing a format would silently garble audio, so each one is required
        if self.sink.rate == 0 {
            return Err(anyhow::anyhow!("Sink rate must be set (--rate or APP_SINK__RATE)"));
        }
        if self.sink.width == 0 {
            return Err(anyhow::anyhow!("Sink width must be set (--width or APP_SINK__WIDTH)"));
        }
        if self.sink.channels == 0 {
            return Err(anyhow::anyhow!(
                "Sink channels must be set (--channels or APP_SINK__CHANNELS)"
            ));
        }

        validate_format(&self.target_format())
            .map_err(|e| anyhow::anyhow!("Invalid sink format: {}", e))?;

        if self.sink.samples_per_chunk == 0 {
            return Err(anyhow::anyhow!("Samples per chunk must be greater than 0"));
        }

        self.server
            .uri
            .parse::<ServerUri>()
            .with_context(|| format!("Invalid server URI {:?}", self.server.uri))?;

        Ok(())
    }

    /// The sink program as an argv.
    pub fn sink_command(&self) -> Result<Vec<String>> {
        if self.sink.program.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Sink program must be set (--program or APP_SINK__PROGRAM)"
            ));
        }

        let argv = split_command_line(&self.sink.program).map_err(|e| {
            anyhow::anyhow!("Invalid sink program {:?}: {}", self.sink.program, e)
        })?;
        if argv.is_empty() {
            return Err(anyhow::anyhow!("Sink program must contain a command"));
        }
        Ok(argv)
    }

    /// The format every chunk is converted to before reaching the sink.
    pub fn target_format(&self) -> AudioFormat {
        AudioFormat::new(self.sink.rate, self.sink.width, self.sink.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sink.program = "aplay -r 22050 -c 1 -f S16_LE -t raw".to_string();
        config.sink.rate = 22050;
        config.sink.width = 2;
        config.sink.channels = 1;
        config
    }

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["wyoming-snd-external", "--config", "no-such-config-file"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.uri, "stdio://");
        assert_eq!(config.target_format(), AudioFormat::new(0, 0, 0));
        assert_eq!(config.sink.samples_per_chunk, 1024);
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_sink_format_is_required() {
        for unset in ["rate", "width", "channels"] {
            let mut config = valid_config();
            match unset {
                "rate" => config.sink.rate = 0,
                "width" => config.sink.width = 0,
                _ => config.sink.channels = 0,
            }
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(&format!("--{}", unset)), "{}", err);
        }
    }

    #[test]
    fn test_program_alone_does_not_validate() {
        let config = AppConfig::load(&args(&["--program", "aplay"])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_program_is_required() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        config.sink.width = 5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sink.rate = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sink.samples_per_chunk = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.server.uri = "http://localhost:10601".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbalanced_quotes_are_rejected() {
        let mut config = valid_config();
        config.sink.program = "aplay 'unterminated".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sink_command_splits_quoted_words() {
        let mut config = valid_config();
        config.sink.program = r#"sh -c "cat > '/tmp/out file.raw'""#.to_string();
        assert_eq!(
            config.sink_command().unwrap(),
            vec!["sh", "-c", "cat > '/tmp/out file.raw'"]
        );
    }

    #[test]
    fn test_load_applies_cli_flags() {
        let args = args(&[
            "--program",
            "paplay --raw",
            "--rate",
            "16000",
            "--width",
            "4",
            "--channels",
            "2",
            "--samples-per-chunk",
            "256",
            "--uri",
            "tcp://127.0.0.1:10601",
            "--debug",
        ]);

        let config = AppConfig::load(&args).unwrap();
        assert_eq!(config.sink.program, "paplay --raw");
        assert_eq!(config.target_format(), AudioFormat::new(16000, 4, 2));
        assert_eq!(config.sink.samples_per_chunk, 256);
        assert_eq!(config.server.uri, "tcp://127.0.0.1:10601");
        assert!(config.logging.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_keeps_defaults_without_flags() {
        let config = AppConfig::load(&args(&["--program", "aplay"])).unwrap();
        assert_eq!(config.sink.samples_per_chunk, 1024);
        assert_eq!(config.server.uri, "stdio://");
    }
}
