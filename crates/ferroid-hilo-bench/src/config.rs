use anyhow::bail;
use clap::Parser;

/// Runtime configuration for the `ferroid-hilo-bench` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferroid-hilo-bench",
    version,
    about = "Drives concurrent writers through shared HiLo leases"
)]
pub struct CliArgs {
    /// Databases to allocate in. Writers are spread across them round-robin.
    ///
    /// Environment variable: `DATABASES`
    #[arg(long, env = "DATABASES", value_delimiter = ',', default_value = "northwind")]
    pub databases: Vec<String>,

    /// Collections to allocate for. Writers are spread across them
    /// round-robin.
    ///
    /// Environment variable: `COLLECTIONS`
    #[arg(long, env = "COLLECTIONS", value_delimiter = ',', default_value = "Users,Orders")]
    pub collections: Vec<String>,

    /// Number of concurrent writer tasks.
    ///
    /// Environment variable: `WRITERS`
    #[arg(long, env = "WRITERS", default_value_t = 64)]
    pub writers: usize,

    /// Identifiers generated by each writer.
    ///
    /// Environment variable: `IDS_PER_WRITER`
    #[arg(long, env = "IDS_PER_WRITER", default_value_t = 10_000)]
    pub ids_per_writer: usize,

    /// Size of the first lease the in-process server hands to a tag.
    ///
    /// Environment variable: `INITIAL_BATCH_SIZE`
    #[arg(long, env = "INITIAL_BATCH_SIZE", default_value_t = 32)]
    pub initial_batch_size: i64,

    /// Upper bound on adaptive lease growth.
    ///
    /// Environment variable: `MAX_BATCH_SIZE`
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 1024 * 1024)]
    pub max_batch_size: i64,

    /// Separator between identifier parts (`users/1-A`).
    ///
    /// Environment variable: `IDENTITY_PARTS_SEPARATOR`
    #[arg(long, env = "IDENTITY_PARTS_SEPARATOR", default_value_t = String::from("/"))]
    pub separator: String,

    /// Tag of the simulated server node, embedded in every identifier.
    ///
    /// Environment variable: `SERVER_TAG`
    #[arg(long, env = "SERVER_TAG", default_value_t = String::from("A"))]
    pub server_tag: String,

    /// Keep every generated identifier and verify none is repeated.
    #[arg(long, env = "CHECK_UNIQUE", default_value_t = false)]
    pub check_unique: bool,
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub databases: Vec<String>,
    pub collections: Vec<String>,
    pub writers: usize,
    pub ids_per_writer: usize,
    pub initial_batch_size: i64,
    pub max_batch_size: i64,
    pub separator: String,
    pub server_tag: String,
    pub check_unique: bool,
    pub total_ids: usize,
}

impl TryFrom<CliArgs> for BenchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let databases: Vec<String> = args
            .databases
            .into_iter()
            .map(|db| db.trim().to_owned())
            .filter(|db| !db.is_empty())
            .collect();
        let collections: Vec<String> = args
            .collections
            .into_iter()
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty())
            .collect();

        if databases.is_empty() {
            bail!("DATABASES must name at least one database");
        }
        if collections.is_empty() {
            bail!("COLLECTIONS must name at least one collection");
        }
        if args.writers == 0 {
            bail!("WRITERS must be greater than 0");
        }
        if args.separator.is_empty() {
            bail!("IDENTITY_PARTS_SEPARATOR must not be empty");
        }
        if args.initial_batch_size <= 0 {
            bail!("INITIAL_BATCH_SIZE must be greater than 0");
        }
        if args.max_batch_size < args.initial_batch_size {
            bail!(
                "MAX_BATCH_SIZE ({}) must be at least INITIAL_BATCH_SIZE ({})",
                args.max_batch_size,
                args.initial_batch_size
            );
        }

        let total_ids = args
            .writers
            .checked_mul(args.ids_per_writer)
            .ok_or_else(|| anyhow::anyhow!("Overflow in total_ids computation"))?;

        Ok(Self {
            databases,
            collections,
            writers: args.writers,
            ids_per_writer: args.ids_per_writer,
            initial_batch_size: args.initial_batch_size,
            max_batch_size: args.max_batch_size,
            separator: args.separator,
            server_tag: args.server_tag,
            check_unique: args.check_unique,
            total_ids,
        })
    }
}
