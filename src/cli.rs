//! Command-line arguments.
//!
//! Without `--daemon` the binary plays (or renders) the given prompts in
//! order, which is handy for listening to crossfades without an editor.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::DaemonConfig;

/// lofi-loop: prompt-to-loop music with crossfaded hand-off
#[derive(Parser, Debug, Default)]
#[command(name = "lofi-loop")]
#[command(about = "Generates looping music from text prompts and crossfades between them")]
#[command(version)]
pub struct Cli {
    /// Prompt to play; repeat to crossfade through several
    #[arg(short, long = "prompt")]
    pub prompts: Vec<String>,

    /// Seconds between successive prompts
    #[arg(long, default_value = "20")]
    pub interval: u64,

    /// Seconds to keep the last loop playing before exiting
    #[arg(long, default_value = "30")]
    pub play_secs: u64,

    /// Write the first prompt's loop to a WAV file instead of playing
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory holding the model artifacts
    #[arg(short, long)]
    pub model_dir: Option<PathBuf>,

    /// Crossfade duration in seconds
    #[arg(long)]
    pub crossfade: Option<f32>,

    /// Output device name as reported by the host
    #[arg(long)]
    pub device: Option<String>,

    /// Generation steps per loop (50 steps per second)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=4096))]
    pub max_steps: Option<u32>,

    /// Run in daemon mode (JSON-RPC over stdio)
    #[arg(long)]
    pub daemon: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if running in CLI mode (not daemon mode).
    pub fn is_cli_mode(&self) -> bool {
        !self.daemon && !self.prompts.is_empty()
    }

    /// Returns true if running in daemon mode.
    pub fn is_daemon_mode(&self) -> bool {
        self.daemon
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn play_duration(&self) -> Duration {
        Duration::from_secs(self.play_secs)
    }

    /// Overrides environment-derived settings with explicit flags.
    pub fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(dir) = &self.model_dir {
            config.model_path = Some(dir.clone());
        }
        if let Some(secs) = self.crossfade {
            config.crossfade_secs = secs;
        }
        if let Some(device) = &self.device {
            config.output_device = Some(device.clone());
        }
        if let Some(steps) = self.max_steps {
            config.max_new_tokens = Some(steps as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_prompts_keep_order() {
        let cli = Cli::try_parse_from(["lofi-loop", "-p", "calm piano", "--prompt", "upbeat drums"])
            .unwrap();
        assert_eq!(cli.prompts, vec!["calm piano", "upbeat drums"]);
        assert!(cli.is_cli_mode());
        assert!(!cli.is_daemon_mode());
        assert_eq!(cli.interval(), Duration::from_secs(20));
    }

    #[test]
    fn daemon_flag_wins_over_prompts() {
        let cli = Cli::try_parse_from(["lofi-loop", "--daemon", "-p", "rain"]).unwrap();
        assert!(cli.is_daemon_mode());
        assert!(!cli.is_cli_mode());
    }

    #[test]
    fn no_arguments_is_neither_mode() {
        let cli = Cli::try_parse_from(["lofi-loop"]).unwrap();
        assert!(!cli.is_cli_mode());
        assert!(!cli.is_daemon_mode());
    }

    #[test]
    fn max_steps_is_range_checked() {
        assert!(Cli::try_parse_from(["lofi-loop", "--max-steps", "0"]).is_err());
        assert!(Cli::try_parse_from(["lofi-loop", "--max-steps", "5000"]).is_err());
        let cli = Cli::try_parse_from(["lofi-loop", "--max-steps", "100"]).unwrap();
        assert_eq!(cli.max_steps, Some(100));
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "lofi-loop",
            "--model-dir",
            "/tmp/models",
            "--crossfade",
            "4.5",
            "--device",
            "USB",
            "--max-steps",
            "250",
        ])
        .unwrap();

        let mut config = DaemonConfig::new();
        config.output_device = Some("Speakers".into());
        cli.apply_to(&mut config);

        assert_eq!(config.model_path, Some(PathBuf::from("/tmp/models")));
        assert_eq!(config.crossfade_secs, 4.5);
        assert_eq!(config.output_device.as_deref(), Some("USB"));
        assert_eq!(config.max_new_tokens, Some(250));
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let mut config = DaemonConfig::new();
        config.crossfade_secs = 3.0;
        Cli::default().apply_to(&mut config);
        assert_eq!(config.crossfade_secs, 3.0);
        assert!(config.model_path.is_none());
    }
}
