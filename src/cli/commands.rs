//! Command dispatch: each subcommand resolves its repository and prints the result

use std::io;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_complete::generate;
use tracing::{debug, instrument};

use crate::application::services::{TreeRepository, AUXILIARY_ALIAS, TREE_ALIAS};
use crate::application::ApplicationError;
use crate::cli::args::{Cli, Commands, ConfigCommands, Target};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::encoding::FragmentAliases;
use crate::domain::entities::Record;
use crate::domain::metadata::TreeMetadata;
use crate::domain::value::{EntityKey, Value};
use crate::infrastructure::di::ServiceContainer;

pub async fn execute_command(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Ok(());
    };

    // commands that need no database
    match command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            return Ok(());
        }
        Commands::Config { command } => return config_command(cli, command),
        _ => {}
    }

    let container = ServiceContainer::new(load_settings(cli)?)?;
    match command {
        Commands::Init => _init(&container).await,
        Commands::Add {
            target,
            parent,
            values,
        } => _add(&container, target, parent.as_deref(), values).await,
        Commands::Get { target } => _get(&container, target).await,
        Commands::Roots { entity } => _roots(&container, entity).await,
        Commands::Trees { entity } => _trees(&container, entity).await,
        Commands::Descendants {
            target,
            tree,
            count,
        } => _descendants(&container, target, *tree, *count).await,
        Commands::Ancestors {
            target,
            tree,
            count,
        } => _ancestors(&container, target, *tree, *count).await,
        Commands::Move { target, to, .. } => _move(&container, target, to.as_deref()).await,
        Commands::Query { target, ancestors } => _query(&container, target, *ancestors),
        Commands::Completion { .. } | Commands::Config { .. } => Ok(()),
    }
}

fn project_dir(cli: &Cli) -> CliResult<PathBuf> {
    match &cli.project_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir()
            .map_err(|e| CliError::Usage(format!("cannot determine current directory: {}", e))),
    }
}

fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let dir = project_dir(cli)?;
    let settings = Settings::load(Some(&dir), cli.config.as_deref())?;
    debug!("settings: {:?}", settings);
    Ok(settings)
}

fn config_command(cli: &Cli, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let settings = load_settings(cli)?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Path => {
            let describe = |path: &PathBuf| {
                let state = if path.exists() { "" } else { " (not found)" };
                format!("{}{}", path.display(), state)
            };
            match global_config_path() {
                Some(path) => output::action("global", &describe(&path)),
                None => output::action("global", "no config directory on this platform"),
            }
            let local = match &cli.config {
                Some(path) => path.clone(),
                None => local_config_path(&project_dir(cli)?),
            };
            output::action("local", &describe(&local));
        }
        ConfigCommands::Template => output::info(&Settings::template()),
    }
    Ok(())
}

/// Parse a comma-separated key into the entity's primary column types.
fn parse_key(metadata: &TreeMetadata, raw: &str) -> CliResult<EntityKey> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != metadata.primary_columns.len() {
        return Err(CliError::InvalidArgs(format!(
            "{} key needs {} value(s), got '{}'",
            metadata.entity,
            metadata.primary_columns.len(),
            raw
        )));
    }
    Ok(EntityKey::new(
        parts
            .iter()
            .zip(&metadata.primary_columns)
            .map(|(part, column)| Value::from(*part).coerce(column.column_type))
            .collect(),
    ))
}

/// Record carrying only the primary key.
fn key_record(metadata: &TreeMetadata, key: &EntityKey) -> Record {
    metadata
        .primary_columns
        .iter()
        .zip(key.values())
        .map(|(column, value)| (column.name.clone(), value.clone()))
        .collect()
}

async fn load(repository: &TreeRepository, raw: &str) -> CliResult<Record> {
    let metadata = repository.metadata();
    let key = parse_key(metadata, raw)?;
    repository.find_by_key(&key).await?.ok_or_else(|| {
        ApplicationError::NotFound {
            entity: metadata.entity.clone(),
            key: key.to_string(),
        }
        .into()
    })
}

fn print_records(records: &[Record]) {
    for record in records {
        output::info(record);
    }
}

#[instrument(skip(container))]
async fn _init(container: &ServiceContainer) -> CliResult<()> {
    let count = container.init_schema().await?;
    output::success(&format!(
        "{} entities, {} tables in {}",
        container.settings.entities.len(),
        count,
        container.settings.database.display()
    ));
    Ok(())
}

#[instrument(skip(container))]
async fn _add(
    container: &ServiceContainer,
    target: &Target,
    parent: Option<&str>,
    values: &[String],
) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let metadata = repository.metadata();
    let key = parse_key(metadata, &target.key)?;
    let mut record = key_record(metadata, &key);

    if let Some(raw) = parent {
        let parent_key = parse_key(metadata, raw)?;
        for (column, value) in metadata
            .parent_columns_by_primary()
            .into_iter()
            .zip(parent_key.values())
        {
            record.set(column, value.clone());
        }
    }

    let columns = metadata.selectable_columns();
    for assignment in values {
        let (name, raw) = assignment.split_once('=').ok_or_else(|| {
            CliError::InvalidArgs(format!("expected COLUMN=VALUE, got '{}'", assignment))
        })?;
        let column = columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CliError::InvalidArgs(format!("unknown column: {}", name)))?;
        record.set(name, Value::from(raw).coerce(column.column_type));
    }

    let written = repository.insert(&record).await?;
    output::success(&format!("added {} {}", metadata.entity, written));
    Ok(())
}

#[instrument(skip(container))]
async fn _get(container: &ServiceContainer, target: &Target) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let record = load(&repository, &target.key).await?;
    output::info(&record);
    Ok(())
}

#[instrument(skip(container))]
async fn _roots(container: &ServiceContainer, entity: &str) -> CliResult<()> {
    let repository = container.repository(entity)?;
    print_records(&repository.find_roots().await?);
    Ok(())
}

#[instrument(skip(container))]
async fn _trees(container: &ServiceContainer, entity: &str) -> CliResult<()> {
    let repository = container.repository(entity)?;
    let trees = repository.find_trees().await?;
    for (i, tree) in trees.iter().enumerate() {
        if let Some(root) = tree.root_node() {
            output::header(&format!("Tree {}: {}", i + 1, root.key));
        }
        output::tree(tree);
    }
    Ok(())
}

#[instrument(skip(container))]
async fn _descendants(
    container: &ServiceContainer,
    target: &Target,
    tree: bool,
    count: bool,
) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let entity = load(&repository, &target.key).await?;
    if count {
        output::info(&repository.count_descendants(&entity).await?);
    } else if tree {
        output::tree(&repository.find_descendants_tree(&entity).await?);
    } else {
        print_records(&repository.find_descendants(&entity).await?);
    }
    Ok(())
}

#[instrument(skip(container))]
async fn _ancestors(
    container: &ServiceContainer,
    target: &Target,
    tree: bool,
    count: bool,
) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let entity = load(&repository, &target.key).await?;
    if count {
        output::info(&repository.count_ancestors(&entity).await?);
    } else if tree {
        output::tree(&repository.find_ancestors_tree(&entity).await?);
    } else {
        print_records(&repository.find_ancestors(&entity).await?);
    }
    Ok(())
}

#[instrument(skip(container))]
async fn _move(container: &ServiceContainer, target: &Target, to: Option<&str>) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let entity = load(&repository, &target.key).await?;
    let destination = match to {
        Some(raw) => Some(load(&repository, raw).await?),
        None => None,
    };
    repository.move_to(&entity, destination.as_ref()).await?;
    match to {
        Some(raw) => output::success(&format!("moved {} {} under {}", target.entity, target.key, raw)),
        None => output::success(&format!("moved {} {} to root", target.entity, target.key)),
    }
    Ok(())
}

#[instrument(skip(container))]
fn _query(container: &ServiceContainer, target: &Target, ancestors: bool) -> CliResult<()> {
    let repository = container.repository(&target.entity)?;
    let key = parse_key(repository.metadata(), &target.key)?;
    let entity = key_record(repository.metadata(), &key);
    let aliases = FragmentAliases {
        target: TREE_ALIAS,
        auxiliary: AUXILIARY_ALIAS,
    };
    let query = if ancestors {
        repository.ancestors_query(&entity, aliases)?
    } else {
        repository.descendants_query(&entity, aliases)?
    };
    let statement = query.to_statement();
    output::info(&statement.sql);
    for (i, value) in statement.params.iter().enumerate() {
        output::detail(&format!("${} = {}", i + 1, value));
    }
    Ok(())
}
