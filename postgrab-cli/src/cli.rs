use clap::{Parser, Subcommand, ValueEnum};
use postgrab::ProxyType;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "postgrab",
    version,
    about = "Fetch Reddit posts together with their images, gifs and videos",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Account cookie string, e.g. "token_v2=...; loid=..."
    #[arg(long, global = true, env = "POSTGRAB_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Directory for temporary video downloads
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Proxy used while rate limited, as scheme://host:port or host:port
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Proxy scheme used when --proxy has none
    #[arg(long, global = true, value_enum)]
    pub proxy_type: Option<ProxyKind>,

    #[arg(long, global = true)]
    pub proxy_username: Option<String>,

    #[arg(long, global = true)]
    pub proxy_password: Option<String>,

    /// Route every request through the proxy
    #[arg(long, global = true)]
    pub force_proxy: bool,

    /// ffmpeg binary used to mux video and audio
    #[arg(long, global = true, env = "FFMPEG_PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one or more posts
    Fetch {
        /// Post URLs
        urls: Vec<String>,

        /// File with one post URL per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write every media item to this directory
        #[arg(short, long)]
        save_dir: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Posts fetched at the same time
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Inspect the effective configuration
    Config {
        /// Print the configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
    JsonCompact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProxyKind {
    Http,
    Https,
    Socks5,
}

impl From<ProxyKind> for ProxyType {
    fn from(kind: ProxyKind) -> Self {
        match kind {
            ProxyKind::Http => ProxyType::Http,
            ProxyKind::Https => ProxyType::Https,
            ProxyKind::Socks5 => ProxyType::Socks5,
        }
    }
}

impl Commands {
    pub fn output_format(&self) -> Option<OutputFormat> {
        match self {
            Commands::Fetch { output, .. } => Some(*output),
            Commands::Config { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fetch_with_global_flags() {
        let args = Args::try_parse_from([
            "postgrab",
            "fetch",
            "https://www.reddit.com/r/rust/comments/abc/x",
            "--output",
            "json",
            "--proxy",
            "10.0.0.2:8080",
            "--proxy-type",
            "socks5",
            "--force-proxy",
            "-c",
            "8",
        ])
        .unwrap();

        assert_eq!(args.proxy.as_deref(), Some("10.0.0.2:8080"));
        assert_eq!(args.proxy_type, Some(ProxyKind::Socks5));
        assert!(args.force_proxy);
        match args.command {
            Commands::Fetch {
                urls,
                output,
                concurrency,
                ..
            } => {
                assert_eq!(urls.len(), 1);
                assert_eq!(output, OutputFormat::Json);
                assert_eq!(concurrency, Some(8));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["postgrab", "-v", "-q", "config", "--show"]).is_err());
    }
}
