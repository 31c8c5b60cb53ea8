use tnu_bank::config::TnuConfig;
use tnu_bank::id_generator::ContentIdGenerator;
use tnu_bank::query::QueryComposer;
use tnu_bank::{CompositeUsageId, PrimaryRank, SearchResults, TextCombine, TnuBank, UsageQuery, UsageView};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tnu-bank")]
#[command(about = "Taxon name usage bank: encode, store and search name usages")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a usage identifier from its parts
    Encode {
        /// Name string id
        name_id: String,

        /// Bibliographic reference id
        ref_id: String,

        /// Page number (1-99999)
        page_number: u32,

        /// Usage type code or name
        #[arg(short = 't', long, default_value = "NU")]
        usage_type: String,

        /// Usage sub type code or name
        #[arg(short = 's', long)]
        sub_type: Option<String>,

        /// Qualified taxon name id
        #[arg(long)]
        taxon_name_id: Option<String>,
    },
    /// Decode a usage identifier and print its parts
    Decode {
        usage: String,
    },
    /// Encode a usage identifier from its structured JSON form, as printed by decode
    EncodeJson {
        /// JSON payload, or '-' to read it from stdin
        payload: String,
    },
    /// Derive the content id of a text
    DeriveId {
        /// Text to derive the id of; without it the content is read from --file or stdin
        content: Option<String>,

        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,
    },
    /// Create the tables of the configured layout
    Init,
    /// Store usage identifiers
    Store {
        usages: Vec<String>,

        #[arg(short, long, default_value = "anonymous")]
        user: String,
    },
    /// Import usages from a CSV file
    Import {
        /// CSV with columns name_string_id, taxon_name_id, usage_type,
        /// usage_sub_type, bib_ref_id, page_number
        csv_file: PathBuf,

        #[arg(short, long, default_value = "anonymous")]
        user: String,
    },
    /// Search usages
    Search {
        /// Full-text term (repeatable)
        #[arg(long = "text")]
        text: Vec<String>,

        /// Require every text term instead of any
        #[arg(long)]
        all: bool,

        #[arg(long)]
        name_string: Option<String>,

        #[arg(long)]
        taxon_name: Option<String>,

        /// Epithet filter as rank=value, e.g. genus=Abax (repeatable)
        #[arg(long = "epithet", value_parser = parse_epithet)]
        epithets: Vec<(PrimaryRank, String)>,

        #[arg(long)]
        rank: Option<String>,

        #[arg(long)]
        bib_ref: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        year: Option<String>,

        #[arg(long)]
        page: Option<u32>,

        /// Usage type or sub type, code or name
        #[arg(long)]
        usage_type: Option<String>,

        /// Contributor name
        #[arg(long)]
        user: Option<String>,

        /// Only usages that are their own canonical form
        #[arg(long)]
        self_canonical: bool,

        #[arg(long)]
        limit: Option<usize>,

        /// Resolve pool references of every result
        #[arg(long)]
        expand: bool,

        /// Print the composed SQL instead of running it
        #[arg(long)]
        sql: bool,
    },
    /// Look up usages by id
    Get {
        ids: Vec<String>,

        #[arg(long)]
        expand: bool,
    },
    /// Set the canonical alias of a usage (empty to reset)
    Canonical {
        id: String,
        canonical_id: String,

        #[arg(short, long, default_value = "anonymous")]
        user: String,
    },
    /// Flag a usage as deleted
    Delete {
        id: String,

        #[arg(short, long, default_value = "anonymous")]
        user: String,
    },
    /// Clear the deleted flag of a usage
    Restore {
        id: String,

        #[arg(short, long, default_value = "anonymous")]
        user: String,
    },
}

#[derive(Debug, Deserialize)]
struct ImportRow {
    name_string_id: String,
    #[serde(default)]
    taxon_name_id: Option<String>,
    usage_type: String,
    #[serde(default)]
    usage_sub_type: Option<String>,
    bib_ref_id: String,
    page_number: u32,
}

fn parse_epithet(s: &str) -> std::result::Result<(PrimaryRank, String), String> {
    let (rank, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected rank=value, got '{}'", s))?;
    let rank = PrimaryRank::parse(rank).ok_or_else(|| format!("'{}' is not a primary rank", rank))?;
    Ok((rank, value.to_string()))
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    std::io::stdin()
        .read_to_end(&mut bytes)
        .context("Failed to read stdin")?;
    Ok(bytes)
}

fn encode_structured(payload: &[u8]) -> Result<CompositeUsageId> {
    let value: serde_json::Value = serde_json::from_slice(payload).context("Payload is not valid JSON")?;
    Ok(CompositeUsageId::from_structured(&value)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Encode { name_id, ref_id, page_number, usage_type, sub_type, taxon_name_id } => {
            let usage = CompositeUsageId::from_aliases(
                &name_id,
                taxon_name_id.as_deref(),
                &usage_type,
                sub_type.as_deref(),
                &ref_id,
                page_number,
            )?;
            println!("{}", usage);
            Ok(())
        }
        Commands::Decode { usage } => {
            let usage = CompositeUsageId::decode(&usage)?;
            print_json(&usage.to_structured())
        }
        Commands::EncodeJson { payload } => {
            let payload = if payload == "-" { read_stdin()? } else { payload.into_bytes() };
            println!("{}", encode_structured(&payload)?);
            Ok(())
        }
        Commands::DeriveId { content, file } => {
            let generator = ContentIdGenerator::global();
            let id = match (content, file) {
                (Some(content), _) => generator.derive_id(&content),
                (None, Some(file)) => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    generator.derive_id_bytes(&bytes)?
                }
                (None, None) => generator.derive_id_bytes(&read_stdin()?)?,
            };
            println!("{}", id);
            Ok(())
        }
        Commands::Init => {
            let config = TnuConfig::from_env()?;
            TnuBank::from_config(&config).await?;
            println!("Schema ready at {}", config.database_url);
            Ok(())
        }
        Commands::Store { usages, user } => store_usages(usages, user).await,
        Commands::Import { csv_file, user } => import_csv(csv_file, user).await,
        Commands::Search {
            text,
            all,
            name_string,
            taxon_name,
            epithets,
            rank,
            bib_ref,
            author,
            year,
            page,
            usage_type,
            user,
            self_canonical,
            limit,
            expand,
            sql,
        } => {
            let query = UsageQuery {
                full_text: text,
                text_combine: if all { TextCombine::All } else { TextCombine::Any },
                name_string,
                taxon_name,
                epithets: epithets.into_iter().collect(),
                rank,
                bib_ref,
                author,
                year,
                page_number: page,
                usage_type,
                user,
                self_canonical_only: self_canonical,
                limit,
            };
            search(query, expand, sql).await
        }
        Commands::Get { ids, expand } => {
            let ids: Vec<String> = ids.into_iter().map(|id| id.trim().to_uppercase()).unique().collect();
            let bank = open_bank().await?;
            let views = bank.get_usages(&ids, expand).await?;
            if views.len() < ids.len() {
                info!("{} of {} ids not found", ids.len() - views.len(), ids.len());
            }
            print_json(&views)
        }
        Commands::Canonical { id, canonical_id, user } => {
            let bank = open_bank().await?;
            print_json(&bank.set_canonical(&id, &canonical_id, &user).await?)
        }
        Commands::Delete { id, user } => {
            let bank = open_bank().await?;
            print_json(&bank.delete_usage(&id, &user).await?)
        }
        Commands::Restore { id, user } => {
            let bank = open_bank().await?;
            print_json(&bank.restore_usage(&id, &user).await?)
        }
    }
}

async fn open_bank() -> Result<TnuBank> {
    let config = TnuConfig::from_env()?;
    let bank = TnuBank::from_config(&config)
        .await
        .with_context(|| format!("Failed to open usage bank at {}", config.database_url))?;
    Ok(bank)
}

async fn store_usages(usages: Vec<String>, user: String) -> Result<()> {
    let bank = open_bank().await?;
    let outcome = bank.store_usages(&usages, &user).await;
    for record in &outcome.stored {
        println!("{}\t{}", record.id, record.content);
    }
    for (usage, reason) in &outcome.rejected {
        eprintln!("rejected {}: {}", usage, reason);
    }
    if outcome.stored.is_empty() && !outcome.rejected.is_empty() {
        return Err(anyhow!("no usage stored"));
    }
    Ok(())
}

async fn import_csv(csv_file: PathBuf, user: String) -> Result<()> {
    let bank = open_bank().await?;
    let mut reader = csv::Reader::from_path(&csv_file)
        .with_context(|| format!("Failed to open {}", csv_file.display()))?;

    let mut stored = 0usize;
    let mut rejected = 0usize;
    for (line, row) in reader.deserialize::<ImportRow>().enumerate() {
        // header is line 1
        let line = line + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                error!("Line {}: {}", line, e);
                rejected += 1;
                continue;
            }
        };
        let taxon_name_id = row.taxon_name_id.as_deref().filter(|s| !s.trim().is_empty());
        let sub_type = row.usage_sub_type.as_deref().filter(|s| !s.trim().is_empty());
        match bank
            .write_usage_ids(
                &row.name_string_id,
                taxon_name_id,
                &row.usage_type,
                sub_type,
                &row.bib_ref_id,
                row.page_number,
                &user,
            )
            .await
        {
            Ok(record) => {
                println!("{}\t{}", record.id, record.content);
                stored += 1;
            }
            Err(e) => {
                error!("Line {}: {}", line, e);
                rejected += 1;
            }
        }
    }
    info!(stored, rejected, "Imported {}", csv_file.display());
    Ok(())
}

async fn search(query: UsageQuery, expand: bool, sql_only: bool) -> Result<()> {
    let config = TnuConfig::from_env()?;
    if sql_only {
        let composer = QueryComposer::new(config.layout()).with_default_limit(config.default_limit);
        println!("{}", composer.compile(&query)?);
        return Ok(());
    }

    let bank = open_bank().await?;
    let results: SearchResults = bank.find_usages(&query, expand).await?;
    let (views, failure): (Vec<UsageView>, _) = results.collect().await;
    print_json(&views)?;
    match failure {
        Some(e) => Err(anyhow!("search failed: {}", e)),
        None => Ok(()),
    }
}
