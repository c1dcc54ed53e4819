//! bagtree command line
//!
//! Usage:
//!   bagtree root <path>
//!   bagtree proof <path> (--index N | --random R) [--out file]
//!   bagtree verify <proof-file> --root <hex>
//!   bagtree create <path> [--description text]
//!   bagtree bag-root <bag_id>
//!   bagtree bag-proof <bag_id> --random R [--out file]
//!   bagtree download <bag_id> [--wait]
//!   bagtree order <path> --bag-id <hex> [--fee n]

use anyhow::{bail, Context, Result};
use bagtree_client::StorageNodeClient;
use bagtree_config::Config;
use bagtree_core::{
    decode_proof, download_bag, encode_proof, from_hex, to_decimal, to_hex, BagLayout, BagSource,
    DispatchError, Hash, Job, JobOutput, MerkleTree, PollIntervals, PoolConfig, ProofBundle,
    StorageOrder, WorkerPool, PROOF_MAGIC,
};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Parser)]
#[command(name = "bagtree")]
#[command(about = "Merkle roots and storage proofs for storage-node bags", long_about = None)]
struct Cli {
    /// Storage node API URL (overrides config and BAGTREE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Chunk size in bytes (overrides config)
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merkle root of a local file or directory
    Root {
        path: PathBuf,
    },
    /// Build an inclusion proof for one chunk of a local file or directory
    #[command(group(ArgGroup::new("leaf").required(true).args(["index", "random"])))]
    Proof {
        path: PathBuf,
        /// Chunk index to prove
        #[arg(long)]
        index: Option<usize>,
        /// Random challenge mapped onto a chunk
        #[arg(long)]
        random: Option<u64>,
        /// Write the encoded proof here instead of printing hex
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify an encoded proof against a root
    Verify {
        /// Proof file (binary or hex)
        proof: PathBuf,
        /// Expected root, hex
        #[arg(long)]
        root: String,
    },
    /// Register a local path with the storage node
    Create {
        path: PathBuf,
        #[arg(long)]
        description: Option<String>,
    },
    /// Merkle root of a bag held by the storage node
    BagRoot {
        bag_id: String,
    },
    /// Proof for a randomly challenged chunk of a bag held by the storage node
    BagProof {
        bag_id: String,
        #[arg(long)]
        random: u64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Ask the storage node to download a bag
    Download {
        bag_id: String,
        /// Return only once every byte is on disk
        #[arg(long)]
        wait: bool,
    },
    /// Print the storage order fields for a local path
    Order {
        path: PathBuf,
        #[arg(long)]
        bag_id: String,
        /// Total storage fee in the chain's smallest unit
        #[arg(long, default_value_t = 0)]
        fee: u128,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bagtree=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default();
    if let Some(url) = cli.api_url {
        config.storage_node.api_url = url;
    }
    if let Some(size) = cli.chunk_size {
        config.merkle.chunk_size = size;
    }
    let chunk_size = config.merkle.chunk_size;

    match cli.command {
        Commands::Root { path } => {
            let layout = local_layout(&path)?;
            let root = run_local(Job::RootHash { bag_id: display(&path) }, layout, chunk_size)
                .await?
                .root;
            print_root(&root);
        }
        Commands::Proof { path, index, random, out } => {
            let layout = local_layout(&path)?;
            let bundle = match (index, random) {
                (Some(index), _) => {
                    let (_, bundle) = tokio::task::spawn_blocking(move || prove_index(&layout, chunk_size, index))
                        .await
                        .context("Proof task failed")??;
                    bundle
                }
                (None, Some(random)) => {
                    let job = Job::Proof { bag_id: display(&path), random };
                    run_local(job, layout, chunk_size)
                        .await?
                        .bundle
                        .context("Proof job returned no bundle")?
                }
                (None, None) => bail!("Either --index or --random is required"),
            };
            write_proof(&bundle, out.as_deref())?;
        }
        Commands::Verify { proof, root } => {
            let root = from_hex(&root).context("Invalid root hash")?;
            let data = std::fs::read(&proof)
                .with_context(|| format!("Failed to read {}", proof.display()))?;
            let bundle = decode_proof(&proof_bytes(data)?).context("Invalid proof")?;
            if bundle.verify(&root) {
                println!("valid: chunk {}/{}", bundle.leaf_index, bundle.leaf_count);
            } else {
                bail!("Proof does not match root {}", to_hex(&root));
            }
        }
        Commands::Create { path, description } => {
            let client = client(&config);
            let path = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            let bag_id = client
                .create_bag(&path.to_string_lossy(), description.as_deref())
                .await?;
            println!("{}", bag_id);
        }
        Commands::BagRoot { bag_id } => {
            let pool = WorkerPool::new(Arc::new(client(&config)), pool_config(&config));
            let root = pool.merkle_root(&bag_id).await?;
            print_root(&root);
        }
        Commands::BagProof { bag_id, random, out } => {
            let pool = WorkerPool::new(Arc::new(client(&config)), pool_config(&config));
            let (root, bundle) = pool.proofs(&bag_id, random).await?;
            eprintln!("root: {}", to_hex(&root));
            write_proof(&bundle, out.as_deref())?;
        }
        Commands::Download { bag_id, wait } => {
            let client = client(&config);
            let details = download_bag(
                &client,
                &bag_id,
                &config.storage_node.download_path,
                wait,
                intervals(&config),
                None,
            )
            .await?;
            println!(
                "{}: {}/{} bytes, {} files",
                details.bag_id,
                details.downloaded,
                details.size,
                details.files.len()
            );
        }
        Commands::Order { path, bag_id, fee } => {
            let layout = local_layout(&path)?;
            let file_size = layout.total_size();
            let root = run_local(Job::RootHash { bag_id: bag_id.clone() }, layout, chunk_size)
                .await?
                .root;
            let chunk_size = u32::try_from(chunk_size).context("Chunk size does not fit in 32 bits")?;
            let order = StorageOrder::new(&bag_id, file_size, root, chunk_size)?
                .with_fee(fee)
                .with_period(config.order.storage_period_secs);
            println!("{}", serde_json::to_string_pretty(&order.to_fields())?);
        }
    }

    Ok(())
}

fn client(config: &Config) -> StorageNodeClient {
    StorageNodeClient::new(&config.storage_node.api_url)
        .with_timeout(Duration::from_secs(config.storage_node.timeout_secs))
}

fn intervals(config: &Config) -> PollIntervals {
    PollIntervals {
        header: Duration::from_millis(config.workers.header_poll_ms),
        download: Duration::from_millis(config.workers.download_poll_ms),
    }
}

fn pool_config(config: &Config) -> PoolConfig {
    let mut pool = PoolConfig::new()
        .with_max_concurrent(config.workers.max_concurrent)
        .with_chunk_size(config.merkle.chunk_size)
        .with_intervals(intervals(config))
        .with_wait_for_download(config.workers.wait_for_download);
    if config.workers.wait_timeout_secs > 0 {
        pool = pool.with_wait_timeout(Duration::from_secs(config.workers.wait_timeout_secs));
    }
    pool
}

fn local_layout(path: &Path) -> Result<BagLayout> {
    let layout = if path.is_dir() {
        BagLayout::from_dir(path)
    } else {
        BagLayout::single_file(path)
    };
    layout.with_context(|| format!("Failed to read {}", path.display()))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

struct LocalOutput {
    root: Hash,
    bundle: Option<ProofBundle>,
}

/// Run a job over local files on the blocking pool
async fn run_local(job: Job, layout: BagLayout, chunk_size: usize) -> Result<LocalOutput> {
    debug!("Running {} job over {} files", job.kind(), layout.files.len());
    let output = tokio::task::spawn_blocking(move || bagtree_core::dispatch::compute(job, &layout, chunk_size))
        .await
        .context("Hashing task failed")??;
    Ok(match output {
        JobOutput::Root(root) => LocalOutput { root, bundle: None },
        JobOutput::Proof { root, bundle } => LocalOutput {
            root,
            bundle: Some(bundle),
        },
    })
}

fn prove_index(layout: &BagLayout, chunk_size: usize, index: usize) -> Result<(MerkleTree, ProofBundle), DispatchError> {
    let reader = bagtree_core::ChunkReader::open(layout, chunk_size)?;
    MerkleTree::proof(reader.map(|c| c.map_err(DispatchError::from)), index)
}

fn print_root(root: &Hash) {
    println!("hex: {}", to_hex(root));
    println!("dec: {}", to_decimal(root));
}

fn write_proof(bundle: &ProofBundle, out: Option<&Path>) -> Result<()> {
    let wire = encode_proof(bundle)?;
    match out {
        Some(path) => {
            std::fs::write(path, &wire).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Wrote proof for chunk {}/{} to {}",
                bundle.leaf_index,
                bundle.leaf_count,
                path.display()
            );
        }
        None => println!("{}", hex::encode(&wire)),
    }
    Ok(())
}

/// Accept a raw proof file or its hex rendering
fn proof_bytes(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(&PROOF_MAGIC) {
        return Ok(data);
    }
    let text = String::from_utf8(data).context("Proof file is neither binary nor hex")?;
    hex::decode(text.trim()).context("Proof file is neither binary nor hex")
}
