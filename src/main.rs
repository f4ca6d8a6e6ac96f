use clap::{value_parser, Arg, ArgMatches, Command};
use fanout::{Config, ConcurrentBag, Executor, GroupingEngine, ParallelRange, Record, Result};
use log::{error, info};
use std::{
    collections::BTreeMap,
    hint::black_box,
    sync::{Arc, Mutex, PoisonError},
    thread::sleep,
    time::{Duration, Instant},
};

const OUTER: i64 = 10_000;
const INNER: i64 = 60_000;
const LOCKED_INNER: i64 = 1_000;

fn cli() -> Command {
    let demo = |name: &'static str, about: &'static str| Command::new(name).about(about);

    Command::new("fanout")
        .version(clap::crate_version!())
        .about("Sequential vs parallel runs of the fanout primitives")
        .arg(
            Arg::new("workers")
                .long("workers")
                .short('w')
                .global(true)
                .value_parser(value_parser!(usize))
                .help("Worker threads (default: FANOUT_WORKERS or the number of CPUs)"),
        )
        .arg(
            Arg::new("repeat")
                .long("repeat")
                .global(true)
                .value_parser(value_parser!(usize))
                .default_value("200000")
                .help("Copies of the six sample records used by `filter` and `group`"),
        )
        .subcommand(demo("invoke", "Run two sleeping tasks at once"))
        .subcommand(demo("for", "CPU bound loop, sequential and over a parallel range"))
        .subcommand(demo("lock", "Shared counter behind a mutex"))
        .subcommand(demo("foreach", "Print a list from parallel workers"))
        .subcommand(demo("break", "Stop and break a loop once 300 items are collected"))
        .subcommand(demo("bag", "Concurrent inserts into a bag"))
        .subcommand(demo("filter", "Filter records by age"))
        .subcommand(demo("group", "Group records by age"))
        .subcommand(demo("all", "Run every demo (default)"))
}

struct Demo {
    config: Config,
    repeat: usize,
}

fn ms(d: Duration) -> u128 {
    d.as_millis()
}

fn run1() {
    sleep(Duration::from_secs(2));
    println!("Task 1 took 2 s");
}

fn run2() {
    sleep(Duration::from_secs(3));
    println!("Task 2 took 3 s");
}

fn burn(item: i64) {
    for _ in 0..INNER {
        let mut sum = 0;
        sum += item;
        black_box(sum);
    }
}

impl Demo {
    fn records(&self) -> Vec<Record> {
        let samples = Record::samples();
        let mut records = Vec::with_capacity(samples.len() * self.repeat);
        for _ in 0..self.repeat {
            records.extend(samples.iter().cloned());
        }
        records
    }

    fn invoke(&self) -> Result<()> {
        let executor = Executor::new(&self.config);
        let report = executor.invoke(vec![run1 as fn(), run2 as fn()])?;
        println!("Parallel run {} ms.", ms(report.elapsed));

        let started = Instant::now();
        run1();
        run2();
        println!("Normal run {} ms.", ms(started.elapsed()));
        Ok(())
    }

    fn for_loop(&self) -> Result<()> {
        let started = Instant::now();
        for i in 0..OUTER {
            burn(i);
        }
        println!("NormalFor run {} ms.", ms(started.elapsed()));

        let result = ParallelRange::new(&self.config).for_each(0, OUTER, |i, _| burn(i))?;
        println!("ParallelFor run {} ms.", ms(result.elapsed));
        Ok(())
    }

    fn lock(&self) -> Result<()> {
        let mut num = 0u64;
        let started = Instant::now();
        for _ in 0..OUTER {
            for _ in 0..LOCKED_INNER {
                num += 1;
            }
        }
        black_box(num);
        println!("NormalFor run {} ms, num = {}.", ms(started.elapsed()), num);

        let num = Arc::new(Mutex::new(0u64));
        let shared = Arc::clone(&num);
        let result = ParallelRange::new(&self.config).for_each(0, OUTER, move |_, _| {
            for _ in 0..LOCKED_INNER {
                *shared.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            }
        })?;
        let total = *num.lock().unwrap_or_else(PoisonError::into_inner);
        println!("ParallelFor run {} ms, num = {}.", ms(result.elapsed), total);
        Ok(())
    }

    fn foreach(&self) -> Result<()> {
        let list = (0..100).collect::<Vec<i32>>();
        ParallelRange::new(&self.config).for_each_item(list, |item, _| println!("{}", item))?;
        Ok(())
    }

    fn early_exit(&self) -> Result<()> {
        let range = ParallelRange::new(&self.config);
        for &hard in &[true, false] {
            let bag = Arc::new(ConcurrentBag::new());
            let sink = Arc::clone(&bag);
            let result = range.for_each(0, 1000, move |i, state| {
                if sink.len() >= 300 {
                    if hard {
                        state.stop();
                    } else {
                        state.request_break();
                    }
                    return;
                }
                sink.insert(i);
            })?;
            println!(
                "{}: bag count is {}, lowest break {:?}, {} ms",
                if hard { "Stop" } else { "Break" },
                bag.len(),
                result.lowest_break_iteration,
                ms(result.elapsed),
            );
        }
        Ok(())
    }

    fn bag(&self) -> Result<()> {
        let bag = Arc::new(ConcurrentBag::new());
        let sink = Arc::clone(&bag);
        ParallelRange::new(&self.config).for_each(0, 10_000, move |i, _| sink.insert(i))?;
        println!("ConcurrentBag's count is {}", bag.len());
        Ok(())
    }

    fn filter(&self) -> Result<()> {
        let records = self.records();

        let started = Instant::now();
        let older = records.iter().filter(|c| c.age > 26).cloned().collect::<Vec<_>>();
        println!("Sequential filter: {} records in {} ms.", older.len(), ms(started.elapsed()));

        let started = Instant::now();
        let older = GroupingEngine::new(&self.config).filter(records, |c| c.age > 26)?;
        println!("Parallel filter: {} records in {} ms.", older.len(), ms(started.elapsed()));
        Ok(())
    }

    fn group(&self) -> Result<()> {
        let records = self.records();

        let started = Instant::now();
        let mut by_age = BTreeMap::<u32, Vec<&Record>>::new();
        for r in &records {
            by_age.entry(r.age).or_default().push(r);
        }
        for (age, rs) in &by_age {
            println!("Age={}, count = {}", age, rs.len());
        }
        println!("Sequential group by: {} ms.", ms(started.elapsed()));

        let started = Instant::now();
        let grouping = GroupingEngine::new(&self.config).group_by(records, |r| r.age)?;
        for (age, count) in grouping.counts() {
            println!("Lookup: Age={}, count = {}", age, count);
        }
        println!("Parallel group by: {} ms.", ms(started.elapsed()));
        Ok(())
    }

    fn all(&self) -> Result<()> {
        self.invoke()?;
        self.for_loop()?;
        self.lock()?;
        self.foreach()?;
        self.early_exit()?;
        self.bag()?;
        self.filter()?;
        self.group()
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let (name, args) = matches.subcommand().unwrap_or(("all", matches));

    let mut config = Config::from_env()?;
    if let Some(&workers) = args.get_one::<usize>("workers") {
        config = config.with_workers(workers).with_partitions(workers);
        config.validate()?;
    }
    let repeat = args.get_one::<usize>("repeat").copied().unwrap_or(200_000);

    info!("running `{}` on {} workers", name, config.workers);
    let demo = Demo { config, repeat };
    match name {
        "invoke" => demo.invoke(),
        "for" => demo.for_loop(),
        "lock" => demo.lock(),
        "foreach" => demo.foreach(),
        "break" => demo.early_exit(),
        "bag" => demo.bag(),
        "filter" => demo.filter(),
        "group" => demo.group(),
        _ => demo.all(),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(&cli().get_matches()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
