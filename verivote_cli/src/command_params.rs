use verivote::ElectionParameters;

pub fn command_params(matches: &clap::ArgMatches) {
    let context = matches.value_of("CONTEXT").unwrap_or_default();
    let params = ElectionParameters::new(context);

    match serde_json::to_string_pretty(&params) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("verivote params: unable to encode parameters: {}", e);
            std::process::exit(1);
        }
    }
}
