//! `injector fetch`: run one bulk transfer into a file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use injector::{DownloadConfig, Downloader, Method};

/// Arguments for `injector fetch`.
///
/// Usage: `injector fetch [OPTIONS] -o PATH URL`
#[derive(clap::Args)]
pub struct FetchArgs {
    /// Source URL.
    url: String,

    /// Destination file (created or truncated).
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// JSON download config; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hard cap on the transfer size in bytes.
    #[arg(long)]
    max_len: Option<usize>,

    /// Transfer deadline in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Extra request header (format: key:value).
    #[arg(short = 'H', long = "header")]
    header: Vec<String>,

    /// Send the file's contents as a POST body.
    #[arg(long)]
    post_file: Option<PathBuf>,
}

impl FetchArgs {
    pub async fn run(self) -> Result<()> {
        let config = self.config()?;
        let headers = self
            .header
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>>>()?;
        let body = self
            .post_file
            .as_ref()
            .map(|p| std::fs::read(p).with_context(|| format!("cannot read {}", p.display())))
            .transpose()?;

        let output = self.output.clone();
        let written = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut dl = Downloader::open(config, &output)
                .with_context(|| format!("cannot open {}", output.display()))?;
            for (k, v) in headers {
                dl.set_header(k, v);
            }
            if let Some(body) = body {
                dl.set_method(Method::Post);
                dl.set_post_field(body);
            }
            dl.request().context("download failed")?;
            Ok(dl.position())
        })
        .await??;

        println!("{written} bytes -> {}", self.output.display());
        Ok(())
    }

    /// Builds the download config from the file (if any) and the flags.
    fn config(&self) -> Result<DownloadConfig> {
        let mut config = match &self.config {
            Some(path) => crate::load_json(path)?,
            None => DownloadConfig::default(),
        };
        config.url.clone_from(&self.url);
        if let Some(n) = self.max_len {
            config.max_len = n;
        }
        if let Some(s) = self.timeout_secs {
            config.timeout_secs = s;
        }
        Ok(config)
    }
}

/// Parses `key:value` into a header pair.
fn parse_header(s: &str) -> Result<(String, String)> {
    let (k, v) = s
        .split_once(':')
        .with_context(|| format!("invalid header (expected key:value): {s}"))?;
    let k = k.trim();
    if k.is_empty() {
        anyhow::bail!("empty header name: {s}");
    }
    Ok((k.to_owned(), v.trim().to_owned()))
}
