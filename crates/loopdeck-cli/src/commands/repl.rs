use anyhow::{Context, Result, bail};
use loopdeck_core::repl::{Repl, ReplStorage};
use loopdeck_infrastructure::LocalBackend;

async fn require(store: &LocalBackend, id: &str) -> Result<Repl> {
    match store.get_repl(id).await? {
        Some(repl) => Ok(repl),
        None => bail!("REPL not found: {}", id),
    }
}

pub async fn list(store: &LocalBackend) -> Result<()> {
    let repls = store.get_all_repls().await?;
    if repls.is_empty() {
        println!("No REPLs stored.");
        return Ok(());
    }

    let active = store.get_active_repl_id().await?;
    for summary in repls {
        let marker = if active.as_deref() == Some(summary.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {:<24}  {}",
            marker,
            summary.id,
            summary.name.as_deref().unwrap_or("(untitled)"),
            summary.last_updated
        );
    }
    Ok(())
}

pub async fn create(store: &LocalBackend, name: Option<&str>, code: Option<&str>) -> Result<()> {
    let code = code.unwrap_or(&store.config().starter_code);
    let id = store.create_repl(code, name).await?;
    store.set_active_repl_id(&id).await?;
    println!("✓ Created {}", id);
    Ok(())
}

pub async fn show(store: &LocalBackend, id: &str) -> Result<()> {
    let repl = require(store, id).await?;
    let rendered = serde_json::to_string_pretty(&repl).context("Failed to render REPL")?;
    println!("{}", rendered);
    Ok(())
}

pub async fn archive(store: &LocalBackend, id: &str) -> Result<()> {
    require(store, id).await?;
    store.archive_repl(id).await?;
    println!("✓ Archived {} (local REPLs are removed when archived)", id);
    Ok(())
}

pub async fn unarchive(store: &LocalBackend, id: &str) -> Result<()> {
    store.unarchive_repl(id).await?;
    println!("Local REPLs are never archived; nothing to restore for {}", id);
    Ok(())
}

pub async fn delete(store: &LocalBackend, id: &str) -> Result<()> {
    require(store, id).await?;
    store.delete_repl(id).await?;
    println!("✓ Deleted {}", id);
    Ok(())
}

pub async fn rename(store: &LocalBackend, id: &str, name: &str) -> Result<()> {
    let repl = require(store, id).await?;
    store.save_repl(id, &repl.code, Some(name)).await?;
    println!("✓ Renamed {} to {}", id, name);
    Ok(())
}

pub async fn active(store: &LocalBackend, set: Option<&str>) -> Result<()> {
    if let Some(id) = set {
        require(store, id).await?;
        store.set_active_repl_id(id).await?;
        println!("✓ Active REPL is now {}", id);
        return Ok(());
    }

    match store.get_active_repl_id().await? {
        Some(id) => println!("{}", id),
        None => println!("No active REPL."),
    }
    Ok(())
}
