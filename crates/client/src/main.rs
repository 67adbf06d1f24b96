use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use medctx_client::{Catalog, ContextConfig, DataContext, ExecutionPlan, JoinKind};
use medctx_common::global_metrics;
use medctx_planner::explain_parsed;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty()
        || args
            .first()
            .map(|a| a == "--help" || a == "-h")
            .unwrap_or(false)
    {
        print_usage();
        return Ok(());
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let opts = parse_opts(&args)?;
    let config = opts.apply_to(ContextConfig::from_env());

    let catalog = Catalog::load(&opts.catalog)?;
    let plan = ExecutionPlan::from_json_str(&std::fs::read_to_string(&opts.plan)?)?;
    let mut ctx = DataContext::new(config, Arc::new(catalog));
    let parsed = ctx.load_from_plan(&plan);
    println!("{}", explain_parsed(parsed));

    let entities = ctx.available_entities()?;
    println!("available entities ({}): {}", entities.len(), entities.join(", "));

    let params = opts.params.as_deref();
    match &opts.entity {
        Some(id) => {
            let series = ctx.get_signals(Some(id), params, true)?;
            println!("signals for {id}: {} rows", series.num_rows());
            print_table(&series, opts.limit)?;
        }
        None => {
            let cohort = ctx.get_cohort(None)?;
            println!("cohort: {} rows", cohort.num_rows());
            print_table(&cohort, opts.limit)?;
            for batch in ctx.iter_cases_batch(ctx.config().batch_size, params, true)? {
                let rows: usize = batch.series.values().map(RecordBatch::num_rows).sum();
                println!(
                    "batch {}: {} entities, {} series rows, {} cohort rows",
                    batch.index,
                    batch.entities.len(),
                    rows,
                    batch.cohort_rows.num_rows()
                );
            }
        }
    }

    if let Some(kind) = opts.merge {
        let merged = ctx.get_merged_data(Some(kind))?;
        println!("merged ({kind:?}): {} rows", merged.num_rows());
        print_table(&merged, opts.limit)?;
    }

    println!("{}", serde_json::to_string_pretty(&ctx.summary())?);
    if opts.metrics {
        print!("{}", global_metrics().render_prometheus());
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct InspectOpts {
    catalog: String,
    plan: String,
    entity: Option<String>,
    params: Option<Vec<String>>,
    batch_size: Option<usize>,
    merge: Option<JoinKind>,
    limit: usize,
    sequential: bool,
    metrics: bool,
}

impl InspectOpts {
    fn apply_to(&self, mut config: ContextConfig) -> ContextConfig {
        if self.sequential {
            config.parallel = false;
        }
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        config
    }
}

fn parse_opts(args: &[String]) -> Result<InspectOpts, Box<dyn std::error::Error>> {
    // Accepted forms:
    //   medctx inspect --catalog PATH --plan PATH [...]
    //   medctx --catalog PATH --plan PATH [...]
    let start = usize::from(args.first().map(|a| a.as_str()) == Some("inspect"));

    let mut catalog = None;
    let mut plan = None;
    let mut entity = None;
    let mut params = None;
    let mut batch_size = None;
    let mut merge = None;
    let mut limit = 10usize;
    let mut sequential = false;
    let mut metrics = false;

    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--catalog" => {
                i += 1;
                catalog = Some(args.get(i).cloned().ok_or("missing value for --catalog")?);
            }
            "--plan" => {
                i += 1;
                plan = Some(args.get(i).cloned().ok_or("missing value for --plan")?);
            }
            "--entity" => {
                i += 1;
                entity = Some(args.get(i).cloned().ok_or("missing value for --entity")?);
            }
            "--params" => {
                i += 1;
                let raw = args.get(i).ok_or("missing value for --params")?;
                params = Some(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            "--batch-size" => {
                i += 1;
                let raw = args.get(i).ok_or("missing value for --batch-size")?;
                batch_size = Some(raw.parse::<usize>()?);
            }
            "--merge" => {
                i += 1;
                let raw = args.get(i).ok_or("missing value for --merge")?;
                merge = Some(
                    JoinKind::parse(raw).ok_or_else(|| format!("unknown join kind: {raw}"))?,
                );
            }
            "--limit" => {
                i += 1;
                let raw = args.get(i).ok_or("missing value for --limit")?;
                limit = raw.parse::<usize>()?;
            }
            "--sequential" => sequential = true,
            "--metrics" => metrics = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
        i += 1;
    }

    Ok(InspectOpts {
        catalog: catalog.ok_or("--catalog is required")?,
        plan: plan.ok_or("--plan is required")?,
        entity,
        params,
        batch_size,
        merge,
        limit,
        sequential,
        metrics,
    })
}

fn print_table(batch: &RecordBatch, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    if batch.num_columns() == 0 || limit == 0 {
        return Ok(());
    }
    let head = batch.slice(0, limit.min(batch.num_rows()));
    println!("{}", pretty_format_batches(&[head])?);
    Ok(())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  medctx inspect --catalog PATH --plan PATH [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --entity ID        print one entity's signals instead of batches");
    eprintln!("  --params A,B       narrow signals to these parameter keys");
    eprintln!("  --batch-size N     entities per batch (default MEDCTX_BATCH_SIZE or 100)");
    eprintln!("  --merge KIND       also print the cohort/signal join (inner|left|right|full)");
    eprintln!("  --limit N          rows to print per table (default 10)");
    eprintln!("  --sequential       disable the worker pool");
    eprintln!("  --metrics          print Prometheus metrics at exit");
}
