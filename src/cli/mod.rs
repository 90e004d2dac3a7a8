use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Overrides;
use crate::job::Speaker;

#[derive(Parser)]
#[command(
    name = "srtflow",
    about = "srtflow - Generate SRT subtitles with an AI transcription service and track the job",
    version,
    long_about = "Upload an audio or video file, optionally with a sample transcript, sample audio and speaker hints, then follow the transcription job until its SRT subtitles can be downloaded."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Connection settings that override the config file
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Base URL of the transcription service
    #[arg(long, global = true, env = "SRTFLOW_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Base URL of the job store
    #[arg(long, global = true, env = "SRTFLOW_STORE_URL", value_name = "URL")]
    pub store_url: Option<String>,

    /// API key of the job store
    #[arg(long, global = true, env = "SRTFLOW_STORE_KEY", value_name = "KEY", hide_env_values = true)]
    pub store_key: Option<String>,

    /// Access token of the signed-in user
    #[arg(long, global = true, env = "SRTFLOW_ACCESS_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Id of the signed-in user, recorded as job owner
    #[arg(long, global = true, env = "SRTFLOW_USER_ID", value_name = "ID")]
    pub user_id: Option<String>,
}

impl From<ConnectionArgs> for Overrides {
    fn from(args: ConnectionArgs) -> Self {
        Overrides {
            api_url: args.api_url,
            store_url: args.store_url,
            store_key: args.store_key,
            access_token: args.access_token,
            user_id: args.user_id,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a media file and create a transcription job
    Submit {
        /// Audio or video file to transcribe
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Program name used for the subtitles (defaults to the file name)
        #[arg(short, long, value_name = "NAME")]
        program_name: Option<String>,

        /// Sample transcript (.txt or .srt) showing the desired style
        #[arg(long, value_name = "FILE")]
        teach_txt: Option<PathBuf>,

        /// Sample audio matching the sample transcript
        #[arg(long, value_name = "FILE")]
        teach_audio: Option<PathBuf>,

        /// Speaker hint as ID:NAME[:COMMENT]; repeat for several speakers
        #[arg(short, long = "speaker", value_name = "ID:NAME[:COMMENT]")]
        speakers: Vec<Speaker>,

        /// Follow the job until it finishes
        #[arg(short, long)]
        watch: bool,

        /// Download the subtitles here once the job completes (implies --watch)
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
    },

    /// Show the current status of a job
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Follow a job until it completes or fails
    Watch {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Download the subtitles here once the job completes
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
    },

    /// Download the subtitles of a completed job
    Download {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output: PathBuf,
    },

    /// List the most recent jobs
    Recent {
        /// Number of jobs to list
        #[arg(short, long, value_name = "COUNT")]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show or locate the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List accepted file types and the upload limit
    Formats,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable status board
    Text,
    /// JSON
    Json,
}

impl OutputFormat {
    /// Parse a configured default, falling back to text
    pub fn from_config(value: &str) -> Self {
        <Self as ValueEnum>::from_str(value, true).unwrap_or(OutputFormat::Text)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_parses_speakers() {
        let cli = Cli::try_parse_from([
            "srtflow",
            "submit",
            "lecture.mp4",
            "--program-name",
            "Lecture 1",
            "--speaker",
            "A:Somchai:host",
            "--speaker",
            "A:Suda",
        ])
        .unwrap();

        match cli.command {
            Commands::Submit {
                program_name,
                speakers,
                ..
            } => {
                assert_eq!(program_name.as_deref(), Some("Lecture 1"));
                assert_eq!(speakers.len(), 2);
                assert_eq!(speakers[1].name, "Suda");
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_bad_speaker_is_rejected() {
        assert!(Cli::try_parse_from(["srtflow", "submit", "a.mp3", "--speaker", "A"]).is_err());
    }

    #[test]
    fn test_output_format_from_config() {
        assert_eq!(OutputFormat::from_config("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_config("yaml"), OutputFormat::Text);
    }
}
