use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use studyspace::net::types::{NewComment, NewGroup, NewPost, NewSpace, PostSort};
use studyspace::state::uploads::{UploadStatus, UploadTracker};
use studyspace::util::validate::{LoginForm, RegisterForm};
use studyspace::{ApiClient, ApiError, AuthSession, ClientConfig, LoginRedirect, TokenManager};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("not signed in; run `studyspace login`")]
    NotSignedIn,
    #[error("{0} file(s) failed to upload")]
    UploadsFailed(usize),
    #[error("invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "studyspace", about = "StudySpace command-line client")]
struct Cli {
    #[arg(long, env = "STUDYSPACE_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "STUDYSPACE_REQUEST_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "STUDYSPACE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// Show whether a valid credential is stored and when it expires.
    Status,
    Spaces(SpacesCommand),
    Files(FilesCommand),
    Chat(ChatCommand),
    Groups(GroupsCommand),
    Posts(PostsCommand),
    /// Recent spaces with their statistics.
    Dashboard,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    username: String,
    #[arg(long, env = "STUDYSPACE_PASSWORD", hide_env_values = true)]
    password: String,
    /// Defaults to `--password`.
    #[arg(long)]
    confirm_password: Option<String>,
    #[arg(long, default_value_t = false)]
    accept_terms: bool,
}

#[derive(Args, Debug)]
struct SpacesCommand {
    #[command(subcommand)]
    command: SpacesSubcommand,
}

#[derive(Subcommand, Debug)]
enum SpacesSubcommand {
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Space details with files, chat history and stats.
    Show { space_id: String },
    Create {
        subject: String,
        #[arg(long)]
        topic: Option<String>,
    },
    Delete { space_id: String },
    Stats { space_id: String },
}

#[derive(Args, Debug)]
struct FilesCommand {
    #[command(subcommand)]
    command: FilesSubcommand,
}

#[derive(Subcommand, Debug)]
enum FilesSubcommand {
    List { space_id: String },
    Upload {
        space_id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Delete { space_id: String, file_id: String },
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[command(subcommand)]
    command: ChatSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChatSubcommand {
    Send { space_id: String, message: String },
    History {
        space_id: String,
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Args, Debug)]
struct GroupsCommand {
    #[command(subcommand)]
    command: GroupsSubcommand,
}

#[derive(Subcommand, Debug)]
enum GroupsSubcommand {
    List {
        #[arg(long, default_value_t = false)]
        public_only: bool,
    },
    Show { group_id: String },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = false)]
        private: bool,
    },
    Join { group_id: String },
    Leave { group_id: String },
    Posts {
        group_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value = "newest")]
        sort: PostSort,
    },
}

#[derive(Args, Debug)]
struct PostsCommand {
    #[command(subcommand)]
    command: PostsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PostsSubcommand {
    Show { post_id: String },
    Create {
        group_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Upvote { post_id: String },
    Downvote { post_id: String },
    Comment {
        post_id: String,
        content: String,
        #[arg(long)]
        reply_to: Option<String>,
    },
}

/// Terminal stand-in for navigating to the login page.
struct TerminalRedirect;

impl LoginRedirect for TerminalRedirect {
    fn redirect_to_login(&self, _login_path: &str) {
        eprintln!("session expired or rejected; run `studyspace login` to sign in again");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url);
    }
    if let Some(secs) = cli.timeout_secs.filter(|s| *s > 0) {
        config = config.with_request_timeout_secs(secs);
    }
    config
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = build_config(&cli);
    let tokens = TokenManager::new(config.credential_store());
    let api = ApiClient::new(&config, tokens)?.with_login_redirect(Arc::new(TerminalRedirect));
    tracing::debug!(base_url = %api.base_url(), "client ready");

    match cli.command {
        Command::Login { email, password } => {
            let session = AuthSession::new(api);
            let user = session.login(&LoginForm { email, password }).await?;
            eprintln!("signed in as {}", user.username);
            Ok(())
        }
        Command::Register(args) => run_register(api, args).await,
        Command::Logout => {
            AuthSession::new(api).logout().await;
            eprintln!("signed out");
            Ok(())
        }
        Command::Whoami => {
            let session = AuthSession::new(api);
            let user = session.check_auth().await.ok_or(CliError::NotSignedIn)?;
            print_json(&user)
        }
        Command::Status => {
            let tokens = api.tokens();
            let authenticated = tokens.is_authenticated();
            let expires_at = tokens.expires_at().map(|t| t.unix_timestamp());
            print_json(&serde_json::json!({
                "api_url": api.base_url(),
                "authenticated": authenticated,
                "expires_at": expires_at,
            }))
        }
        Command::Spaces(cmd) => run_spaces(&api, cmd.command).await,
        Command::Files(cmd) => run_files(&api, cmd.command).await,
        Command::Chat(cmd) => run_chat(&api, cmd.command).await,
        Command::Groups(cmd) => run_groups(&api, cmd.command).await,
        Command::Posts(cmd) => run_posts(&api, cmd.command).await,
        Command::Dashboard => print_json(&api.load_dashboard().await?),
    }
}

async fn run_register(api: ApiClient, args: RegisterArgs) -> Result<(), CliError> {
    let session = AuthSession::new(api);
    let form = RegisterForm {
        confirm_password: args.confirm_password.unwrap_or_else(|| args.password.clone()),
        email: args.email,
        username: args.username,
        password: args.password,
        terms_accepted: args.accept_terms,
    };
    let resp = session.register(&form).await?;
    if session.is_authenticated() {
        eprintln!("registered and signed in");
    } else {
        eprintln!("registered; run `studyspace login` to sign in");
    }
    print_json(&resp)
}

async fn run_spaces(api: &ApiClient, cmd: SpacesSubcommand) -> Result<(), CliError> {
    match cmd {
        SpacesSubcommand::List { skip, limit } => print_json(&api.list_spaces(skip, limit).await?),
        SpacesSubcommand::Show { space_id } => print_json(&api.load_space_view(&space_id).await?),
        SpacesSubcommand::Create { subject, topic } => {
            print_json(&api.create_space(&NewSpace { subject, topic }).await?)
        }
        SpacesSubcommand::Delete { space_id } => print_json(&api.delete_space(&space_id).await?),
        SpacesSubcommand::Stats { space_id } => print_json(&api.space_stats(&space_id).await?),
    }
}

async fn run_files(api: &ApiClient, cmd: FilesSubcommand) -> Result<(), CliError> {
    match cmd {
        FilesSubcommand::List { space_id } => print_json(&api.list_files(&space_id).await?),
        FilesSubcommand::Upload { space_id, paths } => {
            let mut tracker = UploadTracker::new(&space_id, paths);
            tracker
                .run(api, |entry| match &entry.error {
                    Some(error) => eprintln!("{}: {} ({error})", entry.filename, entry.status.label()),
                    None => eprintln!("{}: {}", entry.filename, entry.status.label()),
                })
                .await;
            match tracker.count(UploadStatus::Failed) {
                0 => Ok(()),
                failed => Err(CliError::UploadsFailed(failed)),
            }
        }
        FilesSubcommand::Delete { space_id, file_id } => print_json(&api.delete_file(&space_id, &file_id).await?),
    }
}

async fn run_chat(api: &ApiClient, cmd: ChatSubcommand) -> Result<(), CliError> {
    match cmd {
        ChatSubcommand::Send { space_id, message } => {
            let answer = api.send_chat(&space_id, &message).await?;
            println!("{}", answer.answer);
            Ok(())
        }
        ChatSubcommand::History { space_id, skip, limit } => {
            print_json(&api.chat_history(&space_id, skip, limit).await?)
        }
    }
}

async fn run_groups(api: &ApiClient, cmd: GroupsSubcommand) -> Result<(), CliError> {
    match cmd {
        GroupsSubcommand::List { public_only } => print_json(&api.list_groups(public_only).await?),
        GroupsSubcommand::Show { group_id } => print_json(&api.get_group(&group_id).await?),
        GroupsSubcommand::Create { name, description, private } => {
            let group = NewGroup { name, description, is_public: !private };
            print_json(&api.create_group(&group).await?)
        }
        GroupsSubcommand::Join { group_id } => print_json(&api.join_group(&group_id).await?),
        GroupsSubcommand::Leave { group_id } => print_json(&api.leave_group(&group_id).await?),
        GroupsSubcommand::Posts { group_id, page, sort } => {
            print_json(&api.group_posts(&group_id, page, sort).await?)
        }
    }
}

async fn run_posts(api: &ApiClient, cmd: PostsSubcommand) -> Result<(), CliError> {
    match cmd {
        PostsSubcommand::Show { post_id } => print_json(&api.get_post(&post_id).await?),
        PostsSubcommand::Create { group_id, title, content, tags } => {
            let post = NewPost { title, content, tags: Some(tags), files: Vec::new() };
            print_json(&api.create_post(&group_id, &post).await?)
        }
        PostsSubcommand::Upvote { post_id } => print_json(&api.upvote_post(&post_id).await?),
        PostsSubcommand::Downvote { post_id } => print_json(&api.downvote_post(&post_id).await?),
        PostsSubcommand::Comment { post_id, content, reply_to } => {
            let comment = NewComment { content, parent_comment_id: reply_to };
            print_json(&api.add_comment(&post_id, &comment).await?)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
