//! boardsync init command implementation
//!
//! Writes a default `.boardsync.toml` and creates the data directories.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit, Report};
use crate::storage::{Layout, CONFIG_FILE, DATA_DIR};

use super::Context;

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    data_dir: bool,
}

pub fn run(ctx: &Context) -> Result<()> {
    let root = ctx.root()?;
    ensure_dir(&root)?;
    let layout = Layout::new(&root);

    let created_data_dir = !layout.is_initialized();
    if layout.data_dir().exists() && !layout.data_dir().is_dir() {
        return Err(Error::OperationFailed(format!(
            "Expected directory at {}",
            layout.data_dir().display()
        )));
    }
    layout.init()?;
    let created_config = ensure_config(&layout.config_file())?;

    let report = InitReport {
        root: root.clone(),
        created: InitCreated {
            config: created_config,
            data_dir: created_data_dir,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_data_dir {
        created_items.push(format!("{DATA_DIR}/"));
    }

    let header = if created_items.is_empty() {
        "boardsync init: nothing to do"
    } else {
        "boardsync init: initialized board"
    };

    let mut human = Report::new(header);
    human.field("root", root.display().to_string());
    human.field(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.next("boardsync task add <title> --category <id> --column <id>");

    emit(ctx.output(), "init", &report, &human)
}

fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        if !path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                path.display()
            )));
        }
        // An existing config must still parse.
        Config::load(path)?;
        return Ok(false);
    }

    Config::default().save(path)?;
    Ok(true)
}

fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(Error::OperationFailed(format!(
            "Expected directory at {}",
            path.display()
        )));
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}
