use std::process;

use crate::{
    commands::build_app,
    config::Config,
    environment::Environment,
    executor::{ExecuteOptions, ResultFormat},
};

pub struct ValidateOptions {
    pub rules: Vec<String>,
    pub sequential: bool,
    pub concurrency: Option<usize>,
    pub use_cache: bool,
    pub format: ResultFormat,
}

pub async fn handle_validate_command(
    environment: Environment,
    config: Config,
    options: ValidateOptions,
) {
    let app = build_app(environment, config).await;

    let names = if options.rules.is_empty() {
        app.executor
            .catalog()
            .names()
            .map(ToString::to_string)
            .collect()
    } else {
        options.rules
    };

    let report = app
        .executor
        .execute_rules(
            names,
            ExecuteOptions {
                parallel: !options.sequential,
                max_concurrency: options.concurrency,
                use_cache: options.use_cache,
            },
        )
        .await;
    app.shutdown().await;

    match serde_json::to_string_pretty(&report.render(options.format)) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => {
            eprintln!("❌ Failed to render results: {e}");
            process::exit(1);
        }
    }

    eprintln!(
        "🔍 {} rule(s), {} violation(s), {} error(s) in {:?}",
        report.total_rules, report.total_violations, report.errors, report.duration
    );
    if report.errors > 0 {
        process::exit(2);
    }
}
