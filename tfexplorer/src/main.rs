use actix::Actor;
use log::LevelFilter;
use log::{debug, error, info, trace};
use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::{Filter, Response};
use prettytable::{Cell, Row, Table};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tfexplorer::actors::planner::{GetPool, PlannerActor, Reserve};
use tfexplorer::capacity::planner::{FreeEscrow, Planner};
use tfexplorer::capacity::pool::Pool;
use tfexplorer::capacity::reservation::{CapacityReservation, ReservationData};
use tfexplorer::config::Config;
use tfexplorer::escrow::{split_payout, DistributionName, Pricing};
use tfexplorer::store::MemoryStore;
use tfexplorer::{ExplorerError, ExplorerErrorKind, ExplorerResult};

const MIB: u64 = 1 << 20;
/// Amounts are i64, so more decimals can't be represented.
const MAX_PRECISION: u32 = 18;

#[derive(StructOpt, Debug)]
#[structopt(about = "grid explorer capacity engine")]
/// Grid explorer capacity engine
///
/// Inspects the capacity pricing and payout settings of an explorer according to the provided
/// config file, and runs capacity reservations through the planner.
struct Opts {
    /// Path to the config file to use for this invocation.
    #[structopt(
        name = "config",
        default_value = "tfexplorer.toml",
        long,
        short,
        parse(from_os_str)
    )]
    config: PathBuf,
    /// Path to the log file to use. The logfile will automatically roll over if the size
    /// increases beyond 10MiB.
    #[structopt(
        name = "log_file",
        default_value = "tfexplorer.log",
        long,
        parse(from_os_str)
    )]
    log_file: PathBuf,
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Test the configuration
    ///
    /// Loads and validates the configuration, and prints a summary of the escrow settings.
    Test,
    /// Show the default capacity prices
    ///
    /// Prints the monthly price of every unit type in dollars, and the token price used to
    /// convert them.
    Prices,
    /// Compute the cost of capacity
    ///
    /// Computes what a reservation for the given amount of unit seconds costs at the default
    /// prices, in the smallest unit of an asset with the given precision.
    Cost {
        /// Compute unit seconds
        #[structopt(long, default_value = "0")]
        cus: u64,
        /// Storage unit seconds
        #[structopt(long, default_value = "0")]
        sus: u64,
        /// Public ipv4 unit seconds
        #[structopt(long, default_value = "0")]
        ipv4us: u64,
        /// Amount of decimals of the asset
        #[structopt(long, default_value = "7")]
        precision: u32,
    },
    /// Split a payout over its destinations
    ///
    /// Shows how an amount, in the smallest unit of an asset, is split by a payout distribution.
    Split {
        /// The amount to split
        #[structopt(long)]
        amount: i64,
        /// Name of the distribution: grid2, grid3, certified-sales or farmer-sales
        #[structopt(long, default_value = "grid3")]
        distribution: DistributionName,
        /// Amount of decimals of the asset
        #[structopt(long, default_value = "7")]
        precision: u32,
    },
    /// Reserve capacity for free
    ///
    /// Runs a json encoded capacity reservation through the capacity planner, with an escrow
    /// which gives the capacity away, and prints the resulting pool. Signatures are not verified.
    Reserve {
        /// Path to the json encoded capacity reservation
        #[structopt(parse(from_os_str))]
        reservation: PathBuf,
    },
}

/// Lets all records of one crate through, and only the severe ones of everything else.
#[derive(Debug)]
struct CrateFilter {
    krate: &'static str,
    others: LevelFilter,
}

impl Filter for CrateFilter {
    fn filter(&self, record: &log::Record) -> Response {
        let own = record
            .module_path()
            .map_or(false, |path| path.split("::").next() == Some(self.krate));
        if own || record.level() <= self.others {
            Response::Neutral
        } else {
            Response::Reject
        }
    }
}

#[actix_rt::main]
async fn main() -> ExplorerResult<()> {
    if let Err(e) = real_main().await {
        error!("{}", e);
        return Err(e);
    }

    Ok(())
}

async fn real_main() -> ExplorerResult<()> {
    let opts = Opts::from_args();

    init_logger(&opts.log_file)?;

    let cfg = read_cfg(&opts.config)?;

    if let Cmd::Cost { precision, .. } | Cmd::Split { precision, .. } = &opts.cmd {
        if *precision > MAX_PRECISION {
            return Err(ExplorerError::validation(format!(
                "assets have at most {} decimals",
                MAX_PRECISION
            )));
        }
    }

    match opts.cmd {
        Cmd::Test => {
            println!("config {:?} is valid", opts.config);
            let mut table = Table::new();
            table.set_titles(titles(&["setting", "value"]));
            table.add_row(cells(&["network".to_string(), cfg.network().to_string()]));
            table.add_row(cells(&[
                "foundation address".to_string(),
                cfg.foundation_address()
                    .unwrap_or("wallet address")
                    .to_string(),
            ]));
            table.add_row(cells(&[
                "balance check interval".to_string(),
                format!("{:?}", cfg.escrow().balance_check_interval()),
            ]));
            table.add_row(cells(&[
                "reservation timeout".to_string(),
                format!("{}s", cfg.escrow().reservation_timeout()),
            ]));
            table.add_row(cells(&[
                "minimum pool lifetime".to_string(),
                format!("{}s", cfg.planner().min_pool_lifetime()),
            ]));
            print!("{}", table);
        }
        Cmd::Prices => {
            let prices = cfg.prices();
            let mut table = Table::new();
            table.set_titles(titles(&["unit", "price / month"]));
            table.add_row(cells(&["compute unit".to_string(), format!("${}", prices.cu)]));
            table.add_row(cells(&["storage unit".to_string(), format!("${}", prices.su)]));
            table.add_row(cells(&["ipv4 unit".to_string(), format!("${}", prices.ipv4u)]));
            table.add_row(cells(&[
                "token".to_string(),
                format!("${:.3}", prices.tft_price_mill as f64 / 1000.),
            ]));
            print!("{}", table);
            println!(
                "prices on the {} network are divided by {}",
                cfg.network(),
                cfg.network().divisor()
            );
        }
        Cmd::Cost {
            cus,
            sus,
            ipv4us,
            precision,
        } => {
            let pricing = Pricing::new(*cfg.prices(), cfg.network());
            let data = ReservationData {
                pool_id: 0,
                cus,
                sus,
                ipv4us,
                node_ids: Vec::new(),
                currencies: Vec::new(),
            };
            let cost = pricing.cost(&data, &pricing.defaults(), precision)?;
            debug!(
                "cost of {} cus, {} sus, {} ipv4us: {}",
                cus, sus, ipv4us, cost
            );
            println!("{} ({})", cost, format_amount(cost, precision));
        }
        Cmd::Split {
            amount,
            distribution,
            precision,
        } => {
            if amount < 0 {
                return Err(ExplorerError::validation("can't split a negative amount"));
            }
            let mut table = Table::new();
            table.set_titles(titles(&["destination", "share", "amount"]));
            let dist = distribution.distribution();
            for (destination, part) in split_payout(amount, &dist, precision) {
                table.add_row(cells(&[
                    destination.to_string(),
                    format!("{}%", dist.share(destination)),
                    format_amount(part, precision),
                ]));
            }
            print!("{}", table);
        }
        Cmd::Reserve { reservation } => {
            let pool = reserve_free(&cfg, &reservation).await?;
            let mut table = Table::new();
            table.set_titles(titles(&["pool", "value"]));
            table.add_row(cells(&["id".to_string(), pool.id.to_string()]));
            table.add_row(cells(&["customer".to_string(), pool.customer_tid.to_string()]));
            table.add_row(cells(&[
                "nodes".to_string(),
                pool.node_ids.iter().cloned().collect::<Vec<_>>().join(", "),
            ]));
            table.add_row(cells(&["cu seconds".to_string(), pool.cus.to_string()]));
            table.add_row(cells(&["su seconds".to_string(), pool.sus.to_string()]));
            table.add_row(cells(&["ipv4u seconds".to_string(), pool.ipv4us.to_string()]));
            print!("{}", table);
        }
    }

    Ok(())
}

/// Reserve capacity through a planner actor backed by a free escrow, and wait until the
/// capacity reached the pool.
async fn reserve_free(cfg: &Config, path: &Path) -> ExplorerResult<Pool> {
    let encoded = fs::read_to_string(path)
        .map_err(|e| ExplorerError::new(ExplorerErrorKind::Validation, Box::new(e)))?;
    let reservation: CapacityReservation = serde_json::from_str(&encoded)?;

    let (escrow, paid) = FreeEscrow::new(cfg.escrow().paid_buffer());
    let planner = Planner::new(Arc::new(MemoryStore::new()), escrow, *cfg.planner());
    let addr = PlannerActor::new(planner, paid).start();

    let currencies = reservation.data_reservation.currencies.clone();
    let payment = addr
        .send(Reserve {
            reservation,
            currencies,
        })
        .await??;
    debug!(
        "reservation {} stored for pool {}",
        payment.reservation_id, payment.pool_id
    );
    for _ in 0..50 {
        let pool = addr
            .send(GetPool {
                id: payment.pool_id,
            })
            .await??;
        if pool.paid_reservation_ids.contains(&payment.reservation_id) {
            return Ok(pool);
        }
        actix_rt::time::sleep(Duration::from_millis(20)).await;
    }
    Err(ExplorerError::with_message(
        ExplorerErrorKind::Async,
        format!(
            "capacity of reservation {} did not reach pool {}",
            payment.reservation_id, payment.pool_id
        ),
    ))
}

fn init_logger(log_file: &Path) -> ExplorerResult<()> {
    let logging_error =
        |e: String| ExplorerError::with_message(ExplorerErrorKind::Config, e);

    let stem = log_file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| logging_error(format!("invalid log file name {:?}", log_file)))?;
    let mut rolled_log_file = log_file.to_path_buf();
    let name = match rolled_log_file.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.{{}}.{}", stem, ext),
        None => format!("{}.{{}}", stem),
    };
    rolled_log_file.set_file_name(name);
    let rolled_pattern = rolled_log_file
        .to_str()
        .ok_or_else(|| logging_error(format!("invalid log file name {:?}", log_file)))?;

    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(10 * MIB)),
        Box::new(
            FixedWindowRoller::builder()
                .build(rolled_pattern, 5)
                .map_err(|e| logging_error(e.to_string()))?,
        ),
    );
    let appender = RollingFileAppender::builder()
        .append(true)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S %Z)(local)}: {l} {m}{n}",
        )))
        .build(log_file, Box::new(policy))
        .map_err(|e| ExplorerError::new(ExplorerErrorKind::Config, Box::new(e)))?;
    let log_config = LogConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(CrateFilter {
                    krate: "tfexplorer",
                    others: LevelFilter::Warn,
                }))
                .build("logfile", Box::new(appender)),
        )
        .logger(Logger::builder().build("filelogger", LevelFilter::Debug))
        .build(Root::builder().appender("logfile").build(LevelFilter::Debug))
        .map_err(|e| logging_error(e.to_string()))?;
    log4rs::init_config(log_config).map_err(|e| logging_error(e.to_string()))?;
    info!("logger initialized");

    Ok(())
}

fn read_cfg(config: &Path) -> ExplorerResult<Config> {
    trace!("opening config file {:?}", config);
    let cfg_str = fs::read_to_string(config)
        .map_err(|e| ExplorerError::new(ExplorerErrorKind::Config, Box::new(e)))?;

    let cfg: Config = toml::from_str(&cfg_str)?;
    trace!("config read");
    cfg.validate()?;
    trace!("config validated");
    Ok(cfg)
}

/// Format an amount in the smallest unit of an asset as a decimal number.
fn format_amount(amount: i64, precision: u32) -> String {
    if precision == 0 {
        return amount.to_string();
    }
    let unit = 10i64.pow(precision);
    format!(
        "{}.{:0width$}",
        amount / unit,
        amount % unit,
        width = precision as usize
    )
}

fn titles(titles: &[&str]) -> Row {
    Row::new(titles.iter().map(|t| Cell::new(t)).collect())
}

fn cells(values: &[String]) -> Row {
    Row::new(values.iter().map(|v| Cell::new(v)).collect())
}
