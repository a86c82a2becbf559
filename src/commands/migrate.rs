use std::process;

use crate::{
    cli::MigrateAction,
    commands::build_app,
    config::Config,
    environment::Environment,
    migration::{MigrationError, MigrationManager, MigrationProgress, MigrationStatus},
};

pub async fn handle_migrate_command(environment: Environment, config: Config, action: MigrateAction) {
    let app = build_app(environment, config).await;

    let manager = match app.migration_manager().await {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("❌ Migration unavailable: {e}");
            process::exit(1);
        }
    };

    let result = handle_migration_action(&manager, action).await;
    app.shutdown().await;

    if let Err(e) = result {
        eprintln!("❌ Migration failed: {e}");
        process::exit(1);
    }
}

pub async fn handle_migration_action(
    manager: &MigrationManager,
    action: MigrateAction,
) -> Result<(), MigrationError> {
    match action {
        MigrateAction::Plan { id } => {
            let plan = manager.plan(&id).await?;
            println!(
                "📋 Migration '{}': {} -> {}",
                plan.id, plan.source, plan.target
            );
            for step in &plan.steps {
                let marker = if step.critical { "❗" } else { "  " };
                println!(
                    "  {marker} {:<24} {} (~{:?})",
                    step.id, step.description, step.estimated_duration
                );
            }
            println!();
            println!(
                "{} record(s) in {} table(s), estimated {:?}",
                plan.total_records(),
                plan.tables.len(),
                plan.estimated_duration()
            );
        }
        MigrateAction::Run { id } => {
            let plan = match manager.load_plan(&id).await {
                Ok(plan) => plan,
                Err(MigrationError::NotFound(_)) => {
                    println!("No stored plan for '{id}', planning now...");
                    manager.plan(&id).await?
                }
                Err(e) => return Err(e),
            };

            println!("Running migration '{id}' ({} steps)...", plan.steps.len());
            let progress = manager.run(&plan).await?;
            print_progress(&progress);
            if progress.status != MigrationStatus::Completed {
                return Err(MigrationError::Step(format!(
                    "migration '{id}' finished as {}",
                    progress.status
                )));
            }
        }
        MigrateAction::Status { id } => match manager.status(&id).await {
            Some(progress) => print_progress(&progress),
            None => return Err(MigrationError::NotFound(id)),
        },
        MigrateAction::Rollback { id } => {
            let progress = manager.rollback(&id).await?;
            print_progress(&progress);
        }
    }
    Ok(())
}

fn print_progress(progress: &MigrationProgress) {
    println!(
        "📦 Migration '{}': {} (step {}/{}, {}/{} records, {:?})",
        progress.id,
        progress.status,
        progress.current_step.min(progress.total_steps),
        progress.total_steps,
        progress.records_migrated,
        progress.records_total,
        progress.elapsed
    );
    for step in &progress.steps {
        match &step.error {
            None => println!("  ✅ {} ({:?}, {} records)", step.step_id, step.duration, step.records),
            Some(error) => println!("  ❌ {} ({:?}): {error}", step.step_id, step.duration),
        }
    }
    for warning in &progress.warnings {
        println!("  ⚠️ {warning}");
    }
    if let Some(note) = &progress.note {
        println!("  📝 {note}");
    }
}
