use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trawl::{ElasticsearchClient, ImportConfig, Importer};
use trawl_storage::ObjectStoreSource;

mod logging;
mod progress;

use progress::ImportProgress;

#[derive(Parser, Debug)]
#[command(name = "trawl")]
#[command(about = "Import CloudTrail logs from S3 into Elasticsearch, skipping logs imported before")]
#[command(version)]
struct Args {
    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// S3 bucket holding the CloudTrail logs
    #[arg(short, long, env = "TRAWL_BUCKET")]
    bucket: Option<String>,

    /// AWS region of the bucket [default: us-east-1]
    #[arg(short, long, env = "AWS_REGION")]
    region: Option<String>,

    /// Only import keys starting with this prefix
    #[arg(short, long, env = "TRAWL_PREFIX")]
    prefix: Option<String>,

    /// S3-compatible endpoint, e.g. http://localhost:9000 for MinIO
    #[arg(long, env = "TRAWL_S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Concurrent workers [default: 5]
    #[arg(short = 'w', long, env = "TRAWL_PARALLELISM")]
    parallelism: Option<usize>,

    /// Records per bulk request [default: 1000]
    #[arg(short = 's', long, env = "TRAWL_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Elasticsearch URL, required unless set in the config file; port defaults to 9200
    #[arg(short, long, env = "TRAWL_ELASTICSEARCH")]
    elasticsearch: Option<String>,

    /// Index recording imported logs [default: cloudtrail-import-log]
    #[arg(long, env = "TRAWL_WORK_INDEX")]
    work_index: Option<String>,

    /// Index receiving the records [default: cloudtrail]
    #[arg(long, env = "TRAWL_CLOUDTRAIL_INDEX")]
    cloudtrail_index: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, env = "AWS_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_parser = ["pretty", "json"])]
    log_format: Option<String>,

    /// Don't show the progress spinner
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    /// Overlay explicitly given flags on `config`.
    fn apply(&self, config: &mut ImportConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.source.bucket, &self.bucket);
        set(&mut config.source.region, &self.region);
        set(&mut config.source.prefix, &self.prefix);
        set(&mut config.pipeline.parallelism, &self.parallelism);
        set(&mut config.pipeline.batch_size, &self.batch_size);
        set(&mut config.elasticsearch.url, &self.elasticsearch);
        set(&mut config.indices.ledger, &self.work_index);
        set(&mut config.indices.destination, &self.cloudtrail_index);
        set(&mut config.observability.log_format, &self.log_format);

        if self.endpoint.is_some() {
            config.source.endpoint = self.endpoint.clone();
            config.source.allow_http |= self
                .endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with("http://"));
        }
        if self.access_key.is_some() || self.secret_key.is_some() {
            config.source.access_key = self.access_key.clone();
            config.source.secret_key = self.secret_key.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ImportConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ImportConfig::default(),
    };
    args.apply(&mut config);

    logging::init(&config.observability.log_format, &config.observability.log_level);
    config.validate().context("Invalid configuration")?;

    let source = ObjectStoreSource::s3(config.source.s3_config())
        .context("Failed to create S3 client")?
        .with_page_size(config.source.page_size);
    let index = ElasticsearchClient::new(&config.elasticsearch)
        .context("Failed to create Elasticsearch client")?;

    tracing::info!(
        "Importing s3://{}/{} into {} on {}",
        config.source.bucket,
        config.source.prefix,
        config.indices.destination,
        index.base_url().host_str().unwrap_or("?")
    );

    let importer = Importer::new(config, Arc::new(source), Arc::new(index));
    let progress = Arc::new(if args.no_progress {
        ImportProgress::hidden(importer.stats())
    } else {
        ImportProgress::new(importer.stats())
    });
    let ticker = progress.spawn_ticker();

    let result = importer.run().await;
    ticker.abort();
    progress.finish();

    let summary = result.context("Import failed")?;
    println!("{}", summary);
    if summary.has_failures() {
        tracing::warn!("Some logs or records were not imported; see warnings above");
    }

    Ok(())
}
