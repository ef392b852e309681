use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "stageset",
    about = "Stageset: draft/live changesets with ownership closure and atomic publish",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the TOML file declaring types, relations, and policies
    #[arg(long, global = true, default_value = "stageset.toml")]
    pub config: String,

    /// Path to objects JSONL
    #[arg(long, global = true, default_value = ".stageset/objects.jsonl")]
    pub objects: String,

    /// Path to changesets JSONL
    #[arg(long, global = true, default_value = ".stageset/changesets.jsonl")]
    pub changesets: String,

    /// Acting user ID
    #[arg(long, global = true, default_value = "anonymous")]
    pub actor: String,

    /// Permission code held by the actor (repeatable)
    #[arg(long, global = true)]
    pub permission: Vec<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Author draft/live objects directly
    Object {
        #[command(subcommand)]
        command: ObjectCommands,
    },

    /// Group draft changes and publish them together
    Changeset {
        #[command(subcommand)]
        command: ChangesetCommands,
    },
}

#[derive(Subcommand)]
pub enum ObjectCommands {
    /// Create a draft-only object
    Create {
        /// Concrete class name
        #[arg(long = "type")]
        object_type: String,

        /// Field assignment `key=value` (repeatable; JSON values keep their type)
        #[arg(long = "field")]
        fields: Vec<String>,
    },

    /// Merge field assignments into an object's draft
    Edit {
        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,

        /// Field assignment `key=value` (repeatable)
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
    },

    /// Delete one stage of an object
    Delete {
        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,

        /// Stage to delete from
        #[arg(long, value_enum, default_value_t = StageArg::Draft)]
        stage: StageArg,
    },

    /// Publish one object outside any changeset
    Publish {
        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,
    },

    /// Show both stages of one object
    Show {
        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,
    },

    /// List objects with their change type
    List {
        /// Only objects in this type's key space
        #[arg(long = "type")]
        object_type: Option<String>,

        /// Only objects with unpublished changes
        #[arg(long)]
        pending: bool,
    },
}

#[derive(Subcommand)]
pub enum ChangesetCommands {
    /// Open a new changeset
    Create {
        /// Changeset title
        #[arg(long)]
        title: String,
    },

    /// Add an object explicitly and pull in its owned changes
    Add {
        /// Changeset ID or unique prefix
        changeset: String,

        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,
    },

    /// Remove an explicitly added object and everything it alone pulled in
    Remove {
        /// Changeset ID or unique prefix
        changeset: String,

        /// Object type (base or subclass name)
        object_type: String,

        /// Object ID
        id: u64,
    },

    /// Recompute implicit items from the current draft
    Sync {
        /// Changeset ID or unique prefix
        changeset: String,
    },

    /// Show items, change types, and whether the changeset is in sync
    Status {
        /// Changeset ID or unique prefix
        changeset: String,
    },

    /// Report the actor's rights on a changeset
    Can {
        /// Changeset ID or unique prefix
        changeset: String,
    },

    /// Show the order publish would apply items in
    Plan {
        /// Changeset ID or unique prefix
        changeset: String,
    },

    /// Publish every item in one transaction
    Publish {
        /// Changeset ID or unique prefix
        changeset: String,
    },

    /// List changesets, oldest first
    List {
        /// Only changesets in this state: open, published, or reverted
        #[arg(long)]
        state: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    Draft,
    Live,
}
