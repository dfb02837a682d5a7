use crate::config::Config;
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use query_cache::{get_cache_sql, put_cache_sql, CachedBean, Cacher, LruCacher, MemoryStore};
use query_core::{Pk, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Parameters of a simulated data-access workload
#[derive(Debug, Clone)]
pub struct Workload {
    pub tables: usize,
    pub rows: usize,
    pub operations: usize,
    pub write_ratio: f64,
    pub seed: u64,
    pub sweep_every: Option<usize>,
}

/// Row type of the simulated tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub name: String,
    pub age: i64,
}

#[derive(Debug, Default)]
pub struct SimulationReport {
    pub queries: u64,
    pub id_list_hits: u64,
    pub bean_loads: u64,
    pub bean_hits: u64,
    pub writes: u64,
    pub stale_reads: u64,
    pub swept: usize,
}

/// In-memory "database" the workload queries on a miss
struct Database {
    tables: HashMap<String, Vec<Row>>,
}

impl Database {
    fn generate(rng: &mut StdRng, tables: usize, rows: usize) -> Self {
        let tables = (0..tables)
            .map(|t| {
                let rows = (0..rows as i64)
                    .map(|id| Row {
                        id,
                        name: format!("row-{}-{}", t, id),
                        age: rng.gen_range(18..80),
                    })
                    .collect();
                (format!("table_{}", t), rows)
            })
            .collect();
        Self { tables }
    }

    fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn ids_older_than(&self, table: &str, age: i64) -> Vec<Pk> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.age > age)
                    .map(|row| Pk::from(row.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn row(&self, table: &str, id: i64) -> Option<&Row> {
        self.tables.get(table)?.get(id as usize)
    }

    fn row_mut(&mut self, table: &str, id: i64) -> Option<&mut Row> {
        self.tables.get_mut(table)?.get_mut(id as usize)
    }
}

const AGE_FILTER_SQL: &str = "SELECT id FROM {table} WHERE age > ?";

pub async fn simulate(config: &Config, workload: &Workload) -> Result<()> {
    println!(
        "{} Simulating {} operations over {} tables of {} rows (seed {})...",
        "→".bright_blue(),
        workload.operations,
        workload.tables,
        workload.rows,
        workload.seed
    );

    let cacher = Arc::new(
        LruCacher::new(Arc::new(MemoryStore::new()), config.cache.clone())
            .context("Failed to create cacher")?,
    );
    let sweeper = if workload.sweep_every.is_none() {
        Some(cacher.start_sweeper()?)
    } else {
        None
    };

    let start = Instant::now();
    let report = run_workload(&cacher, workload)?;
    let elapsed = start.elapsed();

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    show_cache_stats(&cacher, &report);

    println!(
        "{} {:.2}ms ({:.0} ops/s)",
        "Elapsed:".bright_yellow(),
        elapsed.as_secs_f64() * 1000.0,
        workload.operations as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    if !cacher.check_consistency() {
        anyhow::bail!("Cache index is inconsistent after the workload");
    }
    if report.stale_reads > 0 {
        anyhow::bail!("{} cached reads disagreed with the database", report.stale_reads);
    }
    println!("{} Cache consistent, no stale reads", "✓".bright_green());

    Ok(())
}

fn run_workload(cacher: &LruCacher, workload: &Workload) -> Result<SimulationReport> {
    let mut rng = StdRng::seed_from_u64(workload.seed);
    let mut db = Database::generate(&mut rng, workload.tables.max(1), workload.rows.max(1));
    let tables = db.table_names();
    let mut report = SimulationReport::default();

    for op in 1..=workload.operations {
        let table = &tables[rng.gen_range(0..tables.len())];

        if rng.gen_bool(workload.write_ratio.clamp(0.0, 1.0)) {
            let id = rng.gen_range(0..workload.rows.max(1) as i64);
            let age = rng.gen_range(18..80);
            if let Some(row) = db.row_mut(table, id) {
                row.age = age;
            }
            cacher.del_bean(table, &Pk::from(id).cache_id())?;
            report.writes += 1;
        } else {
            // Few distinct thresholds so that queries repeat
            let threshold = 20 + 10 * rng.gen_range(0..6i64);
            let sql = AGE_FILTER_SQL.replace("{table}", table);
            let args = [Value::from(threshold)];
            report.queries += 1;

            let expected = db.ids_older_than(table, threshold);
            let ids = match get_cache_sql(cacher, table, &sql, &args) {
                Some(ids) => {
                    report.id_list_hits += 1;
                    if ids != expected {
                        report.stale_reads += 1;
                    }
                    ids
                }
                None => {
                    put_cache_sql(cacher, &expected, table, &sql, &args)?;
                    expected
                }
            };

            // Load a few beans of the result, as a paginated read would
            for pk in ids.iter().take(5) {
                load_bean(cacher, &db, table, pk, &mut report)?;
            }
        }

        if let Some(every) = workload.sweep_every {
            if every > 0 && op % every == 0 {
                report.swept += cacher.sweep().total();
            }
        }
    }

    debug!(?report, "Workload finished");
    Ok(report)
}

fn load_bean(
    cacher: &LruCacher,
    db: &Database,
    table: &str,
    pk: &Pk,
    report: &mut SimulationReport,
) -> Result<()> {
    let id = pk.cache_id();
    report.bean_loads += 1;

    let row_id = match pk.values() {
        [Value::Int(id)] => *id,
        other => anyhow::bail!("Unexpected primary key {:?}", other),
    };
    let Some(row) = db.row(table, row_id) else {
        return Ok(());
    };

    match cacher.get_bean(table, &id) {
        Some(bean) => {
            report.bean_hits += 1;
            if bean.downcast_ref::<Row>() != Some(row) {
                report.stale_reads += 1;
            }
        }
        None => cacher.put_bean(table, &id, CachedBean::new(row.clone()))?,
    }
    Ok(())
}

fn show_cache_stats(cacher: &LruCacher, report: &SimulationReport) {
    let stats = cacher.stats();

    println!();
    println!("{}", "Query Cache Statistics".bright_yellow().bold());
    println!();

    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Green),
    ]);

    table.add_row(vec![
        "Enabled",
        if cacher.is_enabled() { "Yes" } else { "No" },
    ]);
    table.add_row(vec!["Id-list Entries", &cacher.len_ids().to_string()]);
    table.add_row(vec!["Bean Entries", &cacher.len_beans().to_string()]);
    table.add_row(vec!["Queries", &report.queries.to_string()]);
    table.add_row(vec!["Id-list Hits", &report.id_list_hits.to_string()]);
    table.add_row(vec!["Bean Loads", &report.bean_loads.to_string()]);
    table.add_row(vec!["Bean Hits", &report.bean_hits.to_string()]);
    table.add_row(vec!["Writes", &report.writes.to_string()]);
    table.add_row(vec!["Total Requests", &stats.total_requests().to_string()]);
    table.add_row(vec!["Hits", &stats.hits().to_string()]);
    table.add_row(vec!["Misses", &stats.misses().to_string()]);
    table.add_row(vec![
        "Hit Rate",
        &format!("{:.1}%", stats.hit_rate() * 100.0),
    ]);
    table.add_row(vec!["Evictions", &stats.evictions().to_string()]);
    table.add_row(vec!["Expirations", &stats.expirations().to_string()]);
    table.add_row(vec!["Invalidations", &stats.invalidations().to_string()]);
    table.add_row(vec!["Swept", &report.swept.to_string()]);

    println!("{}", table);
}

pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists, pass --force to overwrite", path);
    }
    Config::default().save(path)?;
    println!(
        "{} Wrote default configuration to {:?}",
        "✓".bright_green(),
        path
    );
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("{}", "Effective Configuration:".bright_yellow().bold());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(feature = "redis")]
pub fn redis_check(config: &Config, url: Option<String>) -> Result<()> {
    use query_cache::{RedisStore, RemoteCacher, TypeRegistry};

    let mut redis = config.redis.clone();
    if let Some(url) = url {
        redis.url = url;
    }
    println!("{} Connecting to {}...", "→".bright_blue(), redis.url.bright_cyan());

    let store = RedisStore::connect(redis).context("Failed to connect to redis")?;
    store.ping()?;

    let mut registry = TypeRegistry::new();
    registry.register::<Row>("qc.row")?;
    let cacher = RemoteCacher::new(store, registry, config.remote.clone())?;

    let table = "qc_smoke_check";
    let row = Row {
        id: 1,
        name: "smoke".to_string(),
        age: 42,
    };
    let sql = "SELECT id FROM qc_smoke_check WHERE age > ?";
    let args = [Value::from(30)];

    let start = Instant::now();
    cacher.put_bean(table, "1", CachedBean::new(row.clone()))?;
    put_cache_sql(&cacher, &[Pk::from(1)], table, sql, &args)?;

    let bean_ok = cacher
        .get_bean(table, "1")
        .is_some_and(|bean| bean.downcast_ref::<Row>() == Some(&row));
    let ids_ok = get_cache_sql(&cacher, table, sql, &args) == Some(vec![Pk::from(1)]);

    cacher.del_bean(table, "1")?;
    let cleared = cacher.get_bean(table, "1").is_none()
        && get_cache_sql(&cacher, table, sql, &args).is_none();
    let elapsed = start.elapsed();

    let mut results = ComfyTable::new();
    results.set_header(vec![
        Cell::new("Check").fg(Color::Cyan),
        Cell::new("Result").fg(Color::Green),
    ]);
    for (check, ok) in [
        ("Bean round-trip", bean_ok),
        ("Id-list round-trip", ids_ok),
        ("Delete clears table", cleared),
    ] {
        results.add_row(vec![check, if ok { "ok" } else { "FAILED" }]);
    }
    println!("{}", results);
    println!(
        "{} {:.2}ms",
        "Elapsed:".bright_yellow(),
        elapsed.as_secs_f64() * 1000.0
    );

    if !(bean_ok && ids_ok && cleared) {
        anyhow::bail!("Redis smoke check failed");
    }
    println!("{} Redis smoke check passed", "✓".bright_green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_cache::CacheConfig;

    fn workload(seed: u64) -> Workload {
        Workload {
            tables: 3,
            rows: 50,
            operations: 2_000,
            write_ratio: 0.2,
            seed,
            sweep_every: Some(100),
        }
    }

    #[test]
    fn test_workload_has_no_stale_reads() {
        let cacher = LruCacher::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::default().with_max_entries(64),
        )
        .unwrap();

        let report = run_workload(&cacher, &workload(7)).unwrap();

        assert_eq!(report.stale_reads, 0);
        assert!(report.queries > 0);
        assert!(report.id_list_hits > 0);
        assert!(cacher.check_consistency());
    }

    #[test]
    fn test_workload_is_deterministic_per_seed() {
        let run = |seed| {
            let cacher =
                LruCacher::new(Arc::new(MemoryStore::new()), CacheConfig::default()).unwrap();
            let report = run_workload(&cacher, &workload(seed)).unwrap();
            (report.queries, report.writes, report.id_list_hits)
        };
        assert_eq!(run(11), run(11));
    }
}
