use anyhow::{Context, Result};
use mvlc_event_builder::{Callbacks, EventBuilder, EventBuilderConfig, ModuleData, ModuleStorage};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Exercises the event builder core against a self-contained JSON fixture for manual smoke-testing. Not the DAQ runner: this tool does no network or USB I/O and understands only its own demo fixture format."
)]
struct Opt {
    #[structopt(name = "FIXTURE", parse(from_os_str), help = "Fixture file: a config plus a sequence of module-data batches.")]
    fixture: PathBuf,
}

/// One module's payload within a recorded batch.
#[derive(Deserialize, Debug)]
struct ModuleBatch {
    words: Vec<u32>,
    prefix_size: u32,
    #[serde(default)]
    dynamic_size: u32,
    #[serde(default)]
    suffix_size: u32,
    #[serde(default)]
    has_dynamic: bool,
}

/// One step of the fixture's input sequence.
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Step {
    Record {
        event_index: usize,
        modules: Vec<ModuleBatch>,
    },
    SystemEvent {
        header: Vec<u32>,
    },
    Flush {
        #[serde(default)]
        force: bool,
    },
}

#[derive(Deserialize, Debug)]
struct Fixture {
    config: EventBuilderConfig,
    steps: Vec<Step>,
}

struct PrintingCallbacks;

impl Callbacks for PrintingCallbacks {
    fn event_data(&mut self, output_crate_index: i32, event_index: usize, slots: &[ModuleStorage]) {
        println!("event_data crate={output_crate_index} event={event_index}");
        for (mi, slot) in slots.iter().enumerate() {
            println!(
                "  module {mi}: timestamp={:?} words={} prefix={} dynamic={} suffix={}",
                slot.timestamp,
                slot.data.len(),
                slot.prefix_size,
                slot.dynamic_size,
                slot.suffix_size
            );
        }
    }

    fn system_event(&mut self, output_crate_index: i32, header: &[u32]) {
        println!("system_event crate={output_crate_index} header={header:?}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let file = File::open(&opt.fixture).context("failed to open fixture file")?;
    let fixture: Fixture =
        serde_json::from_reader(BufReader::new(file)).context("failed to parse fixture JSON")?;

    let builder = EventBuilder::new(fixture.config, Box::new(PrintingCallbacks))
        .context("fixture config failed validation")?;

    for step in fixture.steps {
        match step {
            Step::Record {
                event_index,
                modules,
            } => {
                let owned: Vec<Vec<u32>> = modules.iter().map(|m| m.words.clone()).collect();
                let views: Vec<ModuleData> = modules
                    .iter()
                    .zip(owned.iter())
                    .map(|(m, words)| {
                        ModuleData::new(words, m.prefix_size, m.dynamic_size, m.suffix_size, m.has_dynamic)
                    })
                    .collect();

                if !builder.record_module_data(event_index, &views) {
                    eprintln!("record_module_data rejected batch for event {event_index}");
                }
            }
            Step::SystemEvent { header } => {
                builder.handle_system_event(&header);
            }
            Step::Flush { force } => {
                let flushed = builder.flush(force);
                println!("flush(force={force}) emitted {flushed} events");
            }
        }
    }

    builder.flush(true);
    println!("{}", builder.debug_dump());

    Ok(())
}
