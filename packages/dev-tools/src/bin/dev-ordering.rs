//! Development CLI for the Ordering Engine
//!
//! Drives the ordering service against a libsql database file so trees can be
//! inspected and manipulated by hand during development.
//!
//! # Usage
//!
//! ```bash
//! export ORDERING_DB=./data/tree.db
//! export ORDERING_CONFIG=./tree.json   # optional, defaults to table "tree_nodes"
//!
//! cargo run --bin dev-ordering -- init
//! cargo run --bin dev-ordering -- insert 1 root 1
//! cargo run --bin dev-ordering -- insert 2 1 1
//! cargo run --bin dev-ordering -- rebuild
//! cargo run --bin dev-ordering -- move 2 root first
//! cargo run --bin dev-ordering -- remove 1
//! cargo run --bin dev-ordering -- remove-many 3 4
//! cargo run --bin dev-ordering -- renumber
//! cargo run --bin dev-ordering -- children 1
//! cargo run --bin dev-ordering -- validate
//! cargo run --bin dev-ordering -- tree
//! ```
//!
//! A parent of `root` (or `-`) means the root level. Log output is controlled
//! by `RUST_LOG`.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueHint};
use ordering_core::db::{DatabaseService, TursoStore};
use ordering_core::models::{Anchor, Node, NodeId};
use ordering_core::{OrderingService, TreeConfig, TreeSnapshot};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Parent argument: a node id, or `root` / `-` for the root level
#[derive(Debug, Clone, Copy)]
struct Parent(Option<NodeId>);

impl FromStr for Parent {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "root" | "-" => Ok(Parent(None)),
            other => other
                .parse()
                .map(|id| Parent(Some(id)))
                .map_err(|_| format!("'{}' is not a node id or 'root'", other)),
        }
    }
}

/// Move reference: `first`, `append`, or the sibling id to insert after
#[derive(Debug, Clone, Copy)]
struct Reference(Anchor);

impl FromStr for Reference {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "first" => Ok(Reference(Anchor::First)),
            "append" => Ok(Reference(Anchor::Append)),
            other => other
                .parse()
                .map(|id| Reference(Anchor::from_reference(Some(id))))
                .map_err(|_| format!("'{}' is not 'first', 'append' or a sibling id", other)),
        }
    }
}

/// Inspect and manipulate a nested-set tree stored in a libsql file
#[derive(Parser, Debug)]
#[command(name = "dev-ordering")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database file
    #[arg(long, env = "ORDERING_DB", default_value = "./data/tree.db", value_hint = ValueHint::FilePath)]
    db: PathBuf,

    /// JSON tree configuration (default: table "tree_nodes", default columns)
    #[arg(long, env = "ORDERING_CONFIG", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the configured table
    Init,

    /// Insert a row the way the data-entry layer does
    Insert {
        id: NodeId,
        parent: Parent,
        position: i64,
        /// Value of the root ordering column
        root_position: Option<i64>,
    },

    /// Recompute every interval
    Rebuild,

    /// Move a node under a parent
    Move {
        id: NodeId,
        parent: Parent,
        /// `first`, `append` (default) or a sibling id; `-1` also means first
        #[arg(allow_hyphen_values = true)]
        reference: Option<Reference>,
    },

    /// Promote a node's children, then rebuild without it
    Remove {
        id: NodeId,
        /// Former parent, for a row that is already deleted
        #[arg(long)]
        former_parent: Option<Parent>,
    },

    /// Remove several nodes in one transaction
    RemoveMany {
        #[arg(required = true)]
        ids: Vec<NodeId>,
    },

    /// Rewrite sibling positions to contiguous ranks
    Renumber,

    /// Widget listing with the first entry
    Children { parent: Option<Parent> },

    /// Compare stored intervals with a rebuild
    Validate,

    /// Print the tree in preorder
    Tree,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TreeConfig> {
    match path {
        Some(path) => TreeConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(TreeConfig::default()),
    }
}

fn print_summary(action: &str, snapshot: &TreeSnapshot) {
    println!(
        "{}: {} nodes, {} rows changed",
        action,
        snapshot.len(),
        snapshot.changed()
    );
}

fn print_tree(rows: &mut [Node], root_level: i64) {
    rows.sort_by_key(|n| (n.left, n.id));
    for node in rows.iter() {
        let depth = (node.level - root_level).max(0) as usize;
        println!(
            "{}{} [{}, {}] level={} pos={}{}",
            "  ".repeat(depth),
            node.id,
            node.left,
            node.right,
            node.level,
            node.position,
            node.root_position
                .map(|p| format!(" root_pos={}", p))
                .unwrap_or_default()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dev_ordering=info,ordering_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    tracing::debug!("Opening {} (table {})", cli.db.display(), config.table);
    let db = Arc::new(
        DatabaseService::new(cli.db.clone())
            .await
            .with_context(|| format!("Failed to open {}", cli.db.display()))?,
    );

    if let Commands::Init = cli.command {
        db.ensure_table(&config).await?;
        println!("Table '{}' ready in {}", config.table, cli.db.display());
        return Ok(());
    }

    let store = Arc::new(TursoStore::new(db, &config)?);
    let service = OrderingService::new(store.clone(), config.clone())?;

    match cli.command {
        Commands::Init => {}
        Commands::Insert {
            id,
            parent,
            position,
            root_position,
        } => {
            let mut node = Node::new(id, parent.0, position);
            if let Some(root_position) = root_position {
                node = node.with_root_position(root_position);
            }
            store.insert(&node).await?;
            println!("Inserted node {} (run `rebuild` to update intervals)", node.id);
        }
        Commands::Rebuild => {
            let snapshot = service.rebuild().await?;
            print_summary("Rebuilt", &snapshot);
        }
        Commands::Move {
            id,
            parent,
            reference,
        } => {
            let anchor = reference.map_or(Anchor::Append, |r| r.0);
            let snapshot = service.move_node(id, parent.0, anchor).await?;
            print_summary("Moved", &snapshot);
        }
        Commands::Remove { id, former_parent } => {
            let snapshot = match former_parent {
                Some(parent) => service.remove_with_parent(id, parent.0).await?,
                None => service.remove(id).await?,
            };
            print_summary("Removed", &snapshot);
        }
        Commands::RemoveMany { ids } => {
            let snapshot = service.remove_many(&ids).await?;
            print_summary("Removed", &snapshot);
        }
        Commands::Renumber => {
            let snapshot = service.renumber().await?;
            print_summary("Renumbered", &snapshot);
        }
        Commands::Children { parent } => {
            let entries = service
                .children_with_first(parent.and_then(|p| p.0))
                .await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Validate => {
            let snapshot = service
                .validate()
                .await
                .map_err(|e| anyhow!("Tree is inconsistent: {}", e))?;
            println!("Tree is consistent ({} nodes)", snapshot.len());
        }
        Commands::Tree => {
            let mut rows = store.rows().await?;
            print_tree(&mut rows, config.root_level);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_move_accepts_widget_reference() {
        let cli = Cli::try_parse_from(["dev-ordering", "move", "4", "root", "-1"]).unwrap();
        match cli.command {
            Commands::Move {
                id,
                parent,
                reference,
            } => {
                assert_eq!(id, 4);
                assert_eq!(parent.0, None);
                assert_eq!(reference.map(|r| r.0), Some(Anchor::First));
            }
            other => panic!("Expected Move, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_many_requires_ids() {
        assert!(Cli::try_parse_from(["dev-ordering", "remove-many"]).is_err());
        let cli = Cli::try_parse_from(["dev-ordering", "remove-many", "3", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::RemoveMany { ids } if ids == vec![3, 7]));
    }

    #[test]
    fn test_parent_parsing() {
        assert_eq!("root".parse::<Parent>().unwrap().0, None);
        assert_eq!("12".parse::<Parent>().unwrap().0, Some(12));
        assert!("x".parse::<Parent>().is_err());
    }
}
