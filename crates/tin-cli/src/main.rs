//! tin - version control for AI coding agents
//!
//! Records conversation threads alongside the history of an external SCM,
//! binds thread versions to SCM commits, and syncs both across machines.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use tin_agents::{
    handle_event, handle_notification, HookContext, IntegrationRegistry, PullOptions,
};
use tin_core::{
    short_id, CommitOptions, CredentialStore, Credentials, GitScm, MergeOptions, MergeOutcome,
    Repository, Role, ScmAdapter, SyncDirection, SyncOutcome, Thread, ThreadStatus,
};
use tin_protocol::{RemoteUrl, ServerAuth, ServerOptions};

#[derive(Parser)]
#[command(name = "tin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Version control for AI coding agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new tin repository
    Init {
        /// Path to initialize (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Create a bare repository (no working tree, store at the root)
        #[arg(long)]
        bare: bool,
    },

    /// Show branch parity, staged and unstaged threads
    Status,

    /// List branches, or delete one
    Branch {
        /// Branch to create from the current tip
        name: Option<String>,

        /// Delete a branch
        #[arg(short = 'd', long = "delete")]
        delete: Option<String>,

        /// Show branch tips as well
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Switch branches (tin HEAD and SCM together)
    Checkout {
        branch: String,

        /// Create the branch first
        #[arg(short = 'b')]
        create: bool,
    },

    /// Stage threads for the next commit
    Add {
        /// Thread ids (prefix ok), optionally with `@N` to stage the
        /// first N messages
        ids: Vec<String>,

        /// Stage every unstaged thread
        #[arg(long)]
        all: bool,
    },

    /// Commit the staged threads
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Skip the tin/SCM branch parity check
        #[arg(long)]
        force: bool,
    },

    /// Show commit history
    Log {
        /// Maximum number of commits to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Show the whole history
        #[arg(long)]
        all: bool,
    },

    /// Inspect and manage threads
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Merge a branch into the current one
    Merge {
        /// Source branch
        branch: Option<String>,

        /// Resume after resolving SCM conflicts
        #[arg(long = "continue")]
        continue_: bool,

        /// Abandon the in-progress merge
        #[arg(long)]
        abort: bool,
    },

    /// Manage remotes
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Push a branch to a remote
    Push {
        /// Remote name or URL (default: origin)
        remote: Option<String>,

        /// Branch (default: current)
        branch: Option<String>,

        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Pull a branch from a remote
    Pull {
        /// Remote name or URL (default: origin)
        remote: Option<String>,

        /// Branch (default: current)
        branch: Option<String>,
    },

    /// Serve repositories over the wire protocol
    Serve {
        /// Multi-repo root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Serve a single repository
        #[arg(long)]
        repo: Option<PathBuf>,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "9418")]
        port: u16,

        /// Speak HTTP instead of the raw TCP protocol
        #[arg(long)]
        http: bool,

        /// Create missing repositories on push
        #[arg(long)]
        auto_create: bool,
    },

    /// Align the tin and SCM branches
    Sync {
        /// Point tin HEAD at the SCM branch instead of the default
        /// direction
        #[arg(long)]
        tin_follows_scm: bool,

        /// Report without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Read and write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Agent integrations: hooks, notifications and imports
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
}

#[derive(Subcommand)]
enum ThreadAction {
    /// List threads, newest first
    List,

    /// Show a thread's messages
    Show { id: String },

    /// Start an empty thread for manual appends
    Start {
        /// Agent name to record
        #[arg(long, default_value = "manual")]
        agent: String,
    },

    /// Append a message to a thread
    Append {
        id: String,
        content: String,

        /// Message role
        #[arg(long, default_value = "human")]
        role: String,
    },

    /// Seal a thread
    Complete { id: String },

    /// Delete a thread
    Delete {
        id: String,

        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List configured remotes
    List,

    /// Add or replace a remote
    Add { name: String, url: String },

    /// Remove a remote
    Remove { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show every configuration key
    List,

    /// Read one key
    Get { key: String },

    /// Set one key
    Set { key: String, value: String },

    /// Store credentials for a host (kept outside the repository)
    Credentials {
        host: String,

        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Handle one hook event from stdin (wired into agent configs)
    Hook { agent: String },

    /// Handle one notification payload from stdin
    Notify { agent: String },

    /// Print notification setup instructions for an agent
    Setup { agent: String },

    /// Install hooks into an agent's configuration
    Install {
        agent: String,

        #[arg(long)]
        global: bool,
    },

    /// Remove installed hooks
    Uninstall {
        agent: String,

        #[arg(long)]
        global: bool,
    },

    /// Import sessions from an agent's own logs
    Pull {
        agent: String,

        /// Specific vendor session id
        #[arg(long)]
        id: Option<String>,

        /// Import the N most recent sessions
        #[arg(long, default_value = "1")]
        recent: usize,

        /// Stage imported threads
        #[arg(long)]
        stage: bool,
    },

    /// List registered integrations
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tin_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Init { path, bare } => cmd_init(&path, bare),
        Commands::Status => cmd_status(),
        Commands::Branch { name, delete, all } => cmd_branch(name, delete, all),
        Commands::Checkout { branch, create } => cmd_checkout(&branch, create),
        Commands::Add { ids, all } => cmd_add(&ids, all),
        Commands::Commit { message, force } => cmd_commit(&message, force),
        Commands::Log { limit, all } => cmd_log(limit, all),
        Commands::Thread { action } => cmd_thread(action),
        Commands::Merge {
            branch,
            continue_,
            abort,
        } => cmd_merge(branch.as_deref(), continue_, abort),
        Commands::Remote { action } => cmd_remote(action),
        Commands::Push {
            remote,
            branch,
            force,
        } => cmd_push(remote.as_deref(), branch.as_deref(), force).await,
        Commands::Pull { remote, branch } => cmd_pull(remote.as_deref(), branch.as_deref()).await,
        Commands::Serve {
            root,
            repo,
            host,
            port,
            http,
            auto_create,
        } => cmd_serve(root, repo, &host, port, http, auto_create).await,
        Commands::Sync {
            tin_follows_scm,
            dry_run,
        } => cmd_sync(tin_follows_scm, dry_run),
        Commands::Config { action } => cmd_config(action),
        Commands::Agent { action } => cmd_agent(action),
    }
}

/// Open the repository containing the current directory, plus its SCM.
fn open_workspace() -> Result<(Repository, GitScm)> {
    let repo = Repository::discover(".").context("not inside a tin repository")?;
    let work_dir = repo
        .work_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((repo, GitScm::new(work_dir)))
}

/// Resolve a thread id prefix against the store.
fn resolve_thread_id(repo: &Repository, prefix: &str) -> Result<String> {
    let ids = repo.store().list_thread_ids()?;
    let matches: Vec<&String> = ids.iter().filter(|id| id.starts_with(prefix)).collect();
    match matches.len() {
        0 => bail!("no thread matches {prefix}"),
        1 => Ok(matches[0].clone()),
        n => bail!("{prefix} is ambiguous ({n} threads match)"),
    }
}

fn cmd_init(path: &PathBuf, bare: bool) -> Result<()> {
    let repo = if bare {
        Repository::init_bare(path)?
    } else {
        Repository::init(path)?
    };
    println!(
        "Initialized empty tin repository at {}",
        repo.store().root().display()
    );
    Ok(())
}

fn cmd_status() -> Result<()> {
    let (repo, scm) = open_workspace()?;
    let state = tin_core::get_branch_state(&repo, &scm)?;

    println!("On branch {}", state.tin_branch);
    match &state.scm_branch {
        Some(scm_branch) if !state.in_sync => {
            println!("SCM is on {scm_branch} (out of sync; run `tin sync`)")
        }
        Some(_) => {}
        None => println!("No SCM repository detected"),
    }

    if repo.merge_state()?.is_some() {
        println!("A merge is in progress (`tin merge --continue` or `tin merge --abort`)");
    }

    let index = repo.get_staged()?;
    if index.is_empty() {
        println!("\nNo threads staged for commit");
    } else {
        println!("\nThreads staged for commit:");
        for entry in index.iter() {
            println!(
                "  {}  {} messages",
                short_id(&entry.thread_id),
                entry.message_count
            );
        }
    }

    let unstaged = repo.get_unstaged_threads()?;
    if !unstaged.is_empty() {
        println!("\nThreads not staged:");
        for thread in &unstaged {
            println!(
                "  {}  {} messages  [{}]",
                short_id(&thread.id),
                thread.messages.len(),
                status_str(thread.status),
            );
        }
    }
    Ok(())
}

fn status_str(status: ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::Active => "active",
        ThreadStatus::Completed => "completed",
        ThreadStatus::Staged => "staged",
        ThreadStatus::Committed => "committed",
    }
}

fn cmd_branch(name: Option<String>, delete: Option<String>, all: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;

    if let Some(name) = delete {
        repo.delete_branch(&name)?;
        if scm.branch_exists(&name).unwrap_or(false) {
            if let Err(e) = scm.delete_branch(&name) {
                eprintln!("warning: scm branch not deleted: {e}");
            }
        }
        println!("Deleted branch {name}");
        return Ok(());
    }

    if let Some(name) = name {
        let tip = repo.current_tip()?;
        repo.write_branch(&name, &tip)?;
        if !scm.branch_exists(&name).unwrap_or(true) {
            scm.create_branch(&name)?;
        }
        println!("Created branch {name}");
        return Ok(());
    }

    let head = repo.head()?;
    for branch in repo.list_branches()? {
        let marker = if branch == head { "*" } else { " " };
        if all {
            let tip = repo.read_branch(&branch)?;
            let tip = if tip.is_empty() {
                "(no commits)"
            } else {
                short_id(&tip)
            };
            println!("{marker} {branch}  {tip}");
        } else {
            println!("{marker} {branch}");
        }
    }
    Ok(())
}

fn cmd_checkout(branch: &str, create: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;

    if create {
        let tip = repo.current_tip()?;
        repo.write_branch(branch, &tip)?;
        if !scm.branch_exists(branch)? {
            scm.create_branch(branch)?;
        }
    } else if !repo.branch_exists(branch) {
        bail!("branch {branch} does not exist (use -b to create it)");
    } else if !scm.branch_exists(branch).unwrap_or(true) {
        scm.create_branch(branch)?;
    }

    scm.checkout(branch)?;
    repo.set_head(branch)?;
    println!("Switched to branch {branch}");
    Ok(())
}

fn cmd_add(ids: &[String], all: bool) -> Result<()> {
    let (repo, _scm) = open_workspace()?;

    if all || ids.iter().any(|id| id == ".") {
        let unstaged = repo.get_unstaged_threads()?;
        if unstaged.is_empty() {
            println!("Nothing to stage");
            return Ok(());
        }
        for thread in &unstaged {
            repo.stage_thread(&thread.id, thread.messages.len(), &thread.content_hash())?;
            println!("Staged {}", short_id(&thread.id));
        }
        return Ok(());
    }

    if ids.is_empty() {
        bail!("nothing specified; use thread ids, `.` or --all");
    }
    for spec in ids {
        let (prefix, count) = match spec.split_once('@') {
            Some((prefix, n)) => (
                prefix,
                Some(n.parse::<usize>().context("bad message count after @")?),
            ),
            None => (spec.as_str(), None),
        };
        let id = resolve_thread_id(&repo, prefix)?;
        let thread = repo.load_thread(&id)?;
        let count = count.unwrap_or(thread.messages.len());
        if count > thread.messages.len() {
            bail!(
                "{} has only {} messages",
                short_id(&id),
                thread.messages.len()
            );
        }
        repo.stage_thread(&id, count, &thread.content_hash_at(count))?;
        println!("Staged {} ({count} messages)", short_id(&id));
    }
    Ok(())
}

fn cmd_commit(message: &str, force: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;
    let outcome = tin_core::commit(
        &repo,
        &scm,
        message,
        CommitOptions {
            force,
            author: None,
        },
    )?;
    println!(
        "[{} {}] {} ({} threads)",
        repo.head()?,
        short_id(&outcome.commit.id),
        message,
        outcome.commit.threads.len()
    );
    if let Some(warning) = outcome.scm_warning {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn cmd_log(limit: usize, all: bool) -> Result<()> {
    let (repo, _scm) = open_workspace()?;
    let commits = if all {
        repo.list_commits()?
    } else {
        let tip = repo.current_tip()?;
        if tip.is_empty() {
            println!("No commits yet");
            return Ok(());
        }
        repo.get_commit_history(&tip, limit)?
    };

    if commits.is_empty() {
        println!("No commits yet");
        return Ok(());
    }
    for commit in commits {
        println!("commit {}", commit.id);
        if commit.is_merge() {
            println!(
                "Merge: {} {}",
                short_id(&commit.parent_commit_id),
                short_id(&commit.second_parent_id)
            );
        }
        println!("Author: {}", commit.author);
        println!("Date:   {}", commit.timestamp.to_rfc3339());
        if !commit.git_commit_hash.is_empty() {
            println!("SCM:    {}", commit.git_commit_hash);
        }
        println!("\n    {}\n", commit.message);
        for thread_ref in &commit.threads {
            println!(
                "    thread {} @ {} messages",
                short_id(&thread_ref.thread_id),
                thread_ref.message_count
            );
        }
        println!();
    }
    Ok(())
}

fn cmd_thread(action: ThreadAction) -> Result<()> {
    let (repo, _scm) = open_workspace()?;
    match action {
        ThreadAction::List => {
            let threads = repo.list_threads()?;
            if threads.is_empty() {
                println!("No threads");
                return Ok(());
            }
            for thread in threads {
                println!(
                    "{}  {}  {} messages  [{}]  {}",
                    short_id(&thread.id),
                    thread.agent,
                    thread.messages.len(),
                    status_str(thread.status),
                    thread.started_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        ThreadAction::Show { id } => {
            let id = resolve_thread_id(&repo, &id)?;
            let thread = repo.load_thread(&id)?;
            println!("thread {}", thread.id);
            println!("agent: {} (session {})", thread.agent, thread.agent_session_id);
            if let Some(parent) = &thread.parent_thread_id {
                println!("resumed from: {}", short_id(parent));
            }
            println!("status: {}\n", status_str(thread.status));
            for message in &thread.messages {
                println!(
                    "[{}] {}",
                    message.role,
                    message.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
                println!("{}\n", message.content);
                for call in &message.tool_calls {
                    println!("  tool {} ({})", call.name, call.id);
                }
            }
        }
        ThreadAction::Start { agent } => {
            let now = chrono::Utc::now();
            let session = format!("manual-{}", now.timestamp());
            let thread = Thread::new(
                tin_agents::placeholder_thread_id(&agent, &session),
                &agent,
                &session,
                now,
            );
            repo.save_thread(&thread)?;
            println!("Started thread {}", thread.id);
        }
        ThreadAction::Append { id, content, role } => {
            let role = match role.as_str() {
                "human" => Role::Human,
                "assistant" => Role::Assistant,
                other => bail!("unknown role {other} (use human or assistant)"),
            };
            let id = resolve_thread_id(&repo, &id)?;
            let mut thread = repo.load_thread(&id)?;
            let outcome = thread.append(role, content, chrono::Utc::now(), vec![]);
            repo.save_thread(&thread)?;
            if let Some(old) = outcome.previous_id {
                if repo.thread_exists(&old) {
                    repo.store().delete_thread(&old)?;
                    repo.store().delete_thread_versions(&old)?;
                }
            }
            if repo.config()?.auto_stage {
                repo.stage_thread(&thread.id, thread.messages.len(), &thread.content_hash())?;
            }
            println!("Appended to {}", short_id(&thread.id));
        }
        ThreadAction::Complete { id } => {
            let id = resolve_thread_id(&repo, &id)?;
            let mut thread = repo.load_thread(&id)?;
            thread.complete(chrono::Utc::now());
            repo.save_thread(&thread)?;
            println!("Completed {}", short_id(&thread.id));
        }
        ThreadAction::Delete { id, force } => {
            let id = resolve_thread_id(&repo, &id)?;
            repo.delete_thread(&id, force)?;
            println!("Deleted {}", short_id(&id));
        }
    }
    Ok(())
}

fn cmd_merge(branch: Option<&str>, continue_: bool, abort: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;

    if abort {
        tin_core::merge_abort(&repo, &scm)?;
        println!("Merge aborted");
        return Ok(());
    }

    let outcome = if continue_ {
        tin_core::merge_continue(&repo, &scm, MergeOptions::default())?
    } else {
        let branch = branch.context("which branch? `tin merge <branch>`")?;
        tin_core::merge(&repo, &scm, branch, MergeOptions::default())?
    };

    match outcome {
        MergeOutcome::AlreadyUpToDate => println!("Already up to date"),
        MergeOutcome::FastForward { tip } => println!("Fast-forwarded to {}", short_id(&tip)),
        MergeOutcome::Conflicted { renamed } => {
            println!("SCM conflicts; resolve them, then run `tin merge --continue`");
            for rename in renamed {
                println!(
                    "  kept both versions of {} (source copy {})",
                    short_id(&rename.original_id),
                    short_id(&rename.new_id)
                );
            }
        }
        MergeOutcome::Completed { commit, renamed } => {
            println!("Merge commit {}", short_id(&commit.id));
            for rename in renamed {
                println!(
                    "  kept both versions of {} (source copy {})",
                    short_id(&rename.original_id),
                    short_id(&rename.new_id)
                );
            }
        }
    }
    Ok(())
}

fn cmd_remote(action: RemoteAction) -> Result<()> {
    let (repo, _scm) = open_workspace()?;
    let mut config = repo.config()?;
    match action {
        RemoteAction::List => {
            for remote in &config.remotes {
                println!("{}\t{}", remote.name, remote.url);
            }
        }
        RemoteAction::Add { name, url } => {
            RemoteUrl::parse(&url).context("invalid remote url")?;
            config.set_remote(&name, &url);
            repo.set_config(&config)?;
            println!("Added remote {name}");
        }
        RemoteAction::Remove { name } => {
            if !config.remove_remote(&name) {
                bail!("no remote named {name}");
            }
            repo.set_config(&config)?;
            println!("Removed remote {name}");
        }
    }
    Ok(())
}

/// Resolve a remote argument (name or URL) to `(scm_remote_name, url)`.
fn resolve_remote(repo: &Repository, arg: Option<&str>) -> Result<(Option<String>, String)> {
    let config = repo.config()?;
    match arg {
        Some(arg) if arg.contains("://") => Ok((None, arg.to_string())),
        Some(name) => {
            let remote = config
                .remote(name)
                .with_context(|| format!("no remote named {name}"))?;
            Ok((Some(name.to_string()), remote.url.clone()))
        }
        None => {
            let remote = config
                .remote("origin")
                .or_else(|| config.remotes.first())
                .context("no remotes configured (`tin remote add origin <url>`)")?;
            Ok((Some(remote.name.clone()), remote.url.clone()))
        }
    }
}

async fn cmd_push(remote: Option<&str>, branch: Option<&str>, force: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;
    let (remote_name, url) = resolve_remote(&repo, remote)?;
    let parsed = RemoteUrl::parse(&url)?;
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => repo.head()?,
    };

    let mut carrier = tin_protocol::connect(&parsed).await?;
    let outcome =
        tin_protocol::push(&repo, carrier.as_mut(), &parsed.repo_path, &branch, force).await?;
    match outcome.message {
        Some(message) => println!("{message}"),
        None => println!("Pushed {} to {}", branch, url),
    }

    // Keep the SCM side in step when the same remote name exists there.
    if let Some(name) = remote_name {
        if scm.remote_url(&name).unwrap_or(None).is_some() {
            if let Err(e) = scm.push(&name, &branch, force) {
                eprintln!("warning: scm push failed: {e}");
            }
        }
    }
    Ok(())
}

async fn cmd_pull(remote: Option<&str>, branch: Option<&str>) -> Result<()> {
    let (repo, scm) = open_workspace()?;
    let (remote_name, url) = resolve_remote(&repo, remote)?;
    let parsed = RemoteUrl::parse(&url)?;
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => repo.head()?,
    };

    let mut carrier = tin_protocol::connect(&parsed).await?;
    let outcome = tin_protocol::pull(&repo, carrier.as_mut(), &parsed.repo_path, &branch).await?;
    println!(
        "Received {} commits, {} thread versions",
        outcome.stats.commits, outcome.stats.threads
    );
    if outcome.updated {
        println!("{} -> {}", branch, short_id(&outcome.tip));
    }

    if let Some(name) = remote_name {
        if scm.remote_url(&name).unwrap_or(None).is_some() {
            if let Err(e) = scm.pull(&name, &branch) {
                eprintln!("warning: scm pull failed: {e}");
            }
        }
    }
    Ok(())
}

async fn cmd_serve(
    root: Option<PathBuf>,
    repo: Option<PathBuf>,
    host: &str,
    port: u16,
    http: bool,
    auto_create: bool,
) -> Result<()> {
    let mut opts = match (root, repo) {
        (Some(_), Some(_)) => bail!("--root and --repo are mutually exclusive"),
        (Some(root), None) => ServerOptions::multi_repo(root),
        (None, Some(repo)) => ServerOptions::single_repo(repo),
        (None, None) => ServerOptions::multi_repo("."),
    };
    opts.auto_create = auto_create;
    opts.auth = ServerAuth::from_env();

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    println!(
        "Serving {} on {} ({})",
        opts.root.display(),
        addr,
        if http { "http" } else { "tcp" }
    );

    if http {
        axum::serve(listener, tin_protocol::router(Arc::new(opts)))
            .await
            .context("http server failed")?;
    } else {
        tin_protocol::serve_tcp(listener, Arc::new(opts))
            .await
            .context("tcp server failed")?;
    }
    Ok(())
}

fn cmd_sync(tin_follows_scm: bool, dry_run: bool) -> Result<()> {
    let (repo, scm) = open_workspace()?;
    let direction = if tin_follows_scm {
        SyncDirection::TinFollowsScm
    } else {
        SyncDirection::ScmFollowsTin
    };
    match tin_core::sync(&repo, &scm, direction, dry_run)? {
        SyncOutcome::InSync { branch } => println!("Already in sync on {branch}"),
        SyncOutcome::ScmCheckedOut { branch, created } => {
            if created {
                println!("Created and checked out SCM branch {branch}");
            } else {
                println!("Checked out SCM branch {branch}");
            }
        }
        SyncOutcome::TinSwitched { branch, created } => {
            if created {
                println!("Created tin branch {branch} and pointed HEAD at it");
            } else {
                println!("Pointed tin HEAD at {branch}");
            }
        }
        SyncOutcome::DryRun { description } => println!("{description}"),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    if let ConfigAction::Credentials {
        host,
        username,
        password,
    } = action
    {
        let mut store = CredentialStore::load()?;
        store.set(&host, Credentials { username, password });
        store.save()?;
        println!("Stored credentials for {host}");
        return Ok(());
    }

    let (repo, _scm) = open_workspace()?;
    let mut config = repo.config()?;
    match action {
        ConfigAction::List => {
            for key in tin_core::Config::keys() {
                if let Some(value) = config.get_key(key) {
                    println!("{key}={value}");
                }
            }
            for remote in &config.remotes {
                println!("remote.{}={}", remote.name, remote.url);
            }
        }
        ConfigAction::Get { key } => match config.get_key(&key) {
            Some(value) => println!("{value}"),
            None => bail!("unknown key {key}"),
        },
        ConfigAction::Set { key, value } => {
            if !config.set_key(&key, &value) {
                bail!("unknown or invalid key {key}");
            }
            repo.set_config(&config)?;
        }
        ConfigAction::Credentials { .. } => {}
    }
    Ok(())
}

fn cmd_agent(action: AgentAction) -> Result<()> {
    let registry = IntegrationRegistry::with_defaults();
    match action {
        AgentAction::Hook { agent } => {
            let (repo, scm) = open_workspace()?;
            let integration = registry.hook(&agent)?;
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("hook payload is not JSON")?;
            let event = integration.parse_event(&payload)?;
            let ctx = HookContext {
                repo: &repo,
                scm: &scm,
                agent: integration.agent(),
            };
            if let Some(thread_id) = handle_event(&ctx, &event)? {
                println!("{thread_id}");
            }
        }
        AgentAction::Notify { agent } => {
            let (repo, scm) = open_workspace()?;
            let integration = registry.notify(&agent)?;
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("notification payload is not JSON")?;
            let event = integration.parse_notification(&payload)?;
            let thread_id = handle_notification(&repo, &scm, integration.agent(), &event)?;
            println!("{thread_id}");
        }
        AgentAction::Setup { agent } => {
            let (repo, _scm) = open_workspace()?;
            let integration = registry.notify(&agent)?;
            let instructions = integration.setup(
                repo.work_dir()
                    .unwrap_or_else(|| std::path::Path::new(".")),
            )?;
            println!("{instructions}");
        }
        AgentAction::Install { agent, global } => {
            let (repo, _scm) = open_workspace()?;
            let integration = registry.hook(&agent)?;
            let project = repo
                .work_dir()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            integration.install(&project, global)?;
            println!("Installed {agent} hooks");
        }
        AgentAction::Uninstall { agent, global } => {
            let (repo, _scm) = open_workspace()?;
            let integration = registry.hook(&agent)?;
            let project = repo
                .work_dir()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            integration.uninstall(&project, global)?;
            println!("Removed {agent} hooks");
        }
        AgentAction::Pull {
            agent,
            id,
            recent,
            stage,
        } => {
            let (repo, _scm) = open_workspace()?;
            let integration = registry.pull(&agent)?;
            let opts = PullOptions { stage };
            let threads = match id {
                Some(id) => vec![integration.pull(&repo, &id, &opts)?],
                None => integration.pull_recent(&repo, recent, &opts)?,
            };
            for thread in threads {
                println!(
                    "Imported {} ({} messages)",
                    short_id(&thread.id),
                    thread.messages.len()
                );
            }
        }
        AgentAction::List => {
            for agent in registry.hook_agents() {
                println!("hook\t{agent}");
            }
            for agent in registry.notify_agents() {
                println!("notify\t{agent}");
            }
            for agent in registry.pull_agents() {
                println!("pull\t{agent}");
            }
        }
    }
    Ok(())
}
