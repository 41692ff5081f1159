use clap::{App, Arg, SubCommand};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use verivote::EngineConfig;

mod command_e2e;
mod command_params;

#[derive(PartialEq, Copy, Clone)]
enum Verbosity {
    Warn,
    Info,
    Debug,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

fn main() {
    let matches = App::new("Verivote CLI")
        .version("1.0")
        .about("Runs and inspects verifiable homomorphic elections")
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("params")
                .about("Print the group parameters for an election context")
                .arg(
                    Arg::with_name("CONTEXT")
                        .index(1)
                        .required(true)
                        .help("Election id the proofs are bound to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("e2e")
                .about("Run a complete election in memory and print the result")
                .arg(
                    Arg::with_name("trustees")
                        .long("trustees")
                        .takes_value(true)
                        .default_value("3")
                        .help("Number of trustees"),
                )
                .arg(
                    Arg::with_name("quorum")
                        .long("quorum")
                        .takes_value(true)
                        .help("Trustees needed to decrypt; every trustee when omitted"),
                )
                .arg(
                    Arg::with_name("answers")
                        .long("answers")
                        .takes_value(true)
                        .required(true)
                        .help("Comma separated answers, for example \"Yes,No\""),
                )
                .arg(
                    Arg::with_name("votes")
                        .long("votes")
                        .takes_value(true)
                        .required(true)
                        .help("Comma separated votes, one per voter"),
                ),
        )
        .get_matches();

    let verbosity = match matches.occurrences_of("v") {
        0 => Verbosity::Warn,
        1 => Verbosity::Info,
        _ => Verbosity::Debug,
    };
    init_logging(verbosity);

    let config = EngineConfig::from_env();

    // Subcommands
    if let Some(matches) = matches.subcommand_matches("params") {
        command_params::command_params(matches);
    } else if let Some(matches) = matches.subcommand_matches("e2e") {
        command_e2e::command_e2e(matches, config);
    } else {
        eprintln!("{}", matches.usage());
        std::process::exit(1);
    }
}

fn init_logging(verbosity: Verbosity) {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(verbosity.into()));

    let result = match config {
        Ok(config) => log4rs::init_config(config).map(|_| ()).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        eprintln!("verivote: unable to configure logging: {}", e);
    }
}
