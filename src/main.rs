//! Command line interface for browsing and posting to hashtag dens. Supports
//! feeds, hot ranking, threads, voting, zap summaries and the user's
//! follow/mute/subscription lists, all backed by a multi-relay pool.

mod aggregate;
mod cache;
mod config;
mod den;
mod event;
mod feed;
mod lists;
mod rank;
mod relay;
mod signer;
mod thread;

use std::{fs, path::Path, time::Duration};

use anyhow::bail;
use clap::{Parser, Subcommand};

use config::Settings;
use event::{Event, UnsignedEvent, COMMENT_KIND, REACTION_KIND};
use feed::{FeedPage, Feeds, DEFAULT_PAGE_LIMIT};
use lists::{ListChange, ListKind, Lists};
use rank::TimeRange;
use relay::{Filter, Pool};
use signer::Signer;
use thread::{Thread, DEFAULT_MAX_DEPTH};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "foxden",
    author,
    version,
    about = "Relay-backed forum client for hashtag dens"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Newest posts, globally or within one den.
    Feed {
        /// Den name; omit for the global feed.
        den: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
        /// Cursor from a previous page.
        #[arg(long)]
        until: Option<u64>,
    },
    /// Posts ranked by hot score within a time range.
    Popular {
        #[arg(long, value_enum, default_value_t = TimeRange::Day)]
        range: TimeRange,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Dens ranked by recent posting activity.
    Dens {
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Authors ranked by recent engagement.
    Users {
        #[arg(long, value_enum, default_value_t = TimeRange::Day)]
        range: TimeRange,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Largest zaps within a time range.
    Zaps {
        #[arg(long, value_enum, default_value_t = TimeRange::Day)]
        range: TimeRange,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// The reply tree under a post.
    Thread {
        /// Den the post lives in.
        den: String,
        /// Event id of the thread root.
        root: String,
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        depth: usize,
    },
    /// Full-text search over posts.
    Search {
        term: String,
        /// Restrict results to one den.
        #[arg(long)]
        den: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
    /// Publish a new top-level post in a den.
    Post { den: String, content: String },
    /// Publish a reply to an existing post or reply.
    Reply {
        den: String,
        /// Event id of the post or reply being answered.
        parent: String,
        content: String,
    },
    /// Publish an up or down vote on an event.
    Vote {
        target: String,
        #[arg(long)]
        down: bool,
    },
    /// Add a pubkey to the follow list.
    Follow { pubkey: String },
    /// Remove a pubkey from the follow list.
    Unfollow { pubkey: String },
    /// Add a pubkey to the mute list.
    Mute { pubkey: String },
    /// Remove a pubkey from the mute list.
    Unmute { pubkey: String },
    /// Add a den to the subscription list.
    Subscribe { den: String },
    /// Remove a den from the subscription list.
    Unsubscribe { den: String },
    /// Print the subscribed dens.
    Subscriptions,
    /// Print the configured identity's public key.
    Whoami,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let pool = Pool::new(
        cfg.relays.clone(),
        cfg.extra_broadcast_relays.clone(),
        Duration::from_millis(cfg.timeout_ms),
        cfg.tor_socks.clone(),
    );
    let signer = Signer::from_secret_hex(cfg.secret_key.as_deref())?;
    let feeds = Feeds::new(pool.clone(), cfg.rank, Duration::from_secs(cfg.cache_ttl_secs));
    let lists = Lists::new(&pool, &signer);
    let now = feed::unix_now();

    match cli.command {
        Commands::Feed { den, limit, until } => {
            let page = match den {
                Some(den) => feeds.den_feed(&den, limit, until).await,
                None => feeds.global_feed(limit, until).await,
            };
            print_page(&page);
        }
        Commands::Popular { range, limit } => {
            print_page(&feeds.popular(range, limit, now).await);
        }
        Commands::Dens { limit } => {
            for stats in feeds.popular_dens(limit).await {
                println!("{:>5}  {}", stats.post_count, stats.name);
            }
        }
        Commands::Users { range, limit } => {
            for user in feeds.popular_users(range, limit, now).await {
                println!(
                    "{:>8.1}  {:>6} sat  {:>3} posts  {:>3} comments  {}",
                    user.engagement,
                    user.total_sats,
                    user.post_count,
                    user.comment_count,
                    user.pubkey
                );
            }
        }
        Commands::Zaps { range, limit } => {
            for zap in feeds.largest_zaps(range, limit, now).await {
                println!("{:>8} sat  {} -> {}", zap.amount_sats, zap.receipt.pubkey, zap.target_id);
            }
        }
        Commands::Thread { den, root, depth } => {
            let thread = thread::fetch_thread(&pool, &den, &root, depth).await;
            println!("{} replies", thread.reply_count());
            print_branch(&thread, &root, 0);
        }
        Commands::Search { term, den, limit } => {
            for ev in feeds.search(&term, den.as_deref(), limit).await {
                println!("{}  {}", ev.id, snippet(&ev.content));
            }
        }
        Commands::Post { den, content } => {
            let ev = signer.sign(UnsignedEvent {
                kind: COMMENT_KIND,
                created_at: now,
                tags: den::post_tags(&den),
                content,
            })?;
            pool.publish(&ev).await?;
            feeds.invalidate();
            println!("{}", ev.id);
        }
        Commands::Reply { den, parent, content } => {
            let parent = fetch_event(&pool, &parent).await?;
            let root = resolve_root(&pool, &parent).await?;
            let ev = signer.sign(UnsignedEvent {
                kind: COMMENT_KIND,
                created_at: now,
                tags: den::reply_tags(&den, &parent, &root),
                content,
            })?;
            pool.publish(&ev).await?;
            feeds.invalidate();
            println!("{}", ev.id);
        }
        Commands::Vote { target, down } => {
            let ev = signer.sign(UnsignedEvent {
                kind: REACTION_KIND,
                created_at: now,
                tags: den::reaction_tags(&target),
                content: if down { "-".into() } else { "+".into() },
            })?;
            pool.publish(&ev).await?;
            feeds.invalidate();
            println!("{}", ev.id);
        }
        Commands::Follow { pubkey } => {
            report_change(lists.add(ListKind::Follows, &pubkey, now).await?);
        }
        Commands::Unfollow { pubkey } => {
            report_change(lists.remove(ListKind::Follows, &pubkey, now).await?);
        }
        Commands::Mute { pubkey } => {
            report_change(lists.add(ListKind::Mutes, &pubkey, now).await?);
        }
        Commands::Unmute { pubkey } => {
            report_change(lists.remove(ListKind::Mutes, &pubkey, now).await?);
        }
        Commands::Subscribe { den } => {
            let entry = den::den_to_identifier(&den);
            report_change(lists.add(ListKind::DenSubscriptions, &entry, now).await?);
        }
        Commands::Unsubscribe { den } => {
            let entry = den::den_to_identifier(&den);
            report_change(lists.remove(ListKind::DenSubscriptions, &entry, now).await?);
        }
        Commands::Subscriptions => {
            let entries = lists
                .read(ListKind::DenSubscriptions, &signer.pubkey()?)
                .await?;
            for entry in entries {
                if let Some(den) = den::identifier_to_den(&entry) {
                    println!("{den}");
                }
            }
        }
        Commands::Whoami => {
            println!("{}", signer.pubkey()?);
        }
    }
    Ok(())
}

/// Fetch one event by id from the user relays.
async fn fetch_event(pool: &Pool, id: &str) -> anyhow::Result<Event> {
    let found = pool
        .query(&[Filter::new().ids([id]).kinds([COMMENT_KIND]).limit(1)])
        .await;
    match found.into_iter().next() {
        Some(ev) => Ok(ev),
        None => bail!("event not found on any relay: {id}"),
    }
}

/// Thread root of a comment: the comment itself when top-level, otherwise
/// the event its root tag points at.
async fn resolve_root(pool: &Pool, parent: &Event) -> anyhow::Result<Event> {
    if den::is_top_level_post(parent) {
        return Ok(parent.clone());
    }
    match parent.root_event_id() {
        Some(root_id) => fetch_event(pool, root_id).await,
        // Legacy comments without a root tag start their own thread.
        None => Ok(parent.clone()),
    }
}

fn print_page(page: &FeedPage) {
    for item in &page.items {
        let m = &item.metrics;
        println!(
            "{}  {:>4}  {:>6} sat  {:>3} replies  {}",
            item.event.id,
            m.score,
            m.total_sats,
            m.reply_count,
            snippet(&item.event.content)
        );
    }
    if let Some(cursor) = page.next_cursor {
        println!("next page: --until {cursor}");
    }
}

fn print_branch(thread: &Thread, node_id: &str, depth: usize) {
    for reply in thread.direct_replies(node_id) {
        println!("{}{}  {}", "  ".repeat(depth), reply.id, snippet(&reply.content));
        print_branch(thread, &reply.id, depth + 1);
    }
    if thread.has_deeper_replies(node_id) {
        println!("{}...", "  ".repeat(depth));
    }
}

fn report_change(change: ListChange) {
    match change {
        ListChange::Updated => println!("updated"),
        ListChange::Unchanged => println!("already up to date"),
    }
}

/// First line of the content, truncated for one-line display.
fn snippet(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(80).collect();
    if out.len() < line.len() {
        out.push_str("...");
    }
    out
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("RELAYS={}\n", relay::FALLBACK_RELAYS.join(",")));
    content.push_str("EXTRA_BROADCAST_RELAYS=\n");
    content.push_str("SECRET_KEY=\n");
    content.push_str("TIMEOUT_MS=5000\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str("CACHE_TTL_SECS=60\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::ENV_MUTEX;
    use crate::relay::tests::{sample_event, spawn_relay};
    use tempfile::TempDir;

    const TEST_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn clear_vars() {
        for v in [
            "RELAYS",
            "EXTRA_BROADCAST_RELAYS",
            "SECRET_KEY",
            "TIMEOUT_MS",
            "TOR_SOCKS",
            "CACHE_TTL_SECS",
            "HOT_GRAVITY",
            "HOT_AGE_OFFSET_HOURS",
            "HOT_REPLY_WEIGHT",
            "HOT_ZAP_WEIGHT",
        ] {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, relay_url: &str, secret: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "RELAYS={relay_url}\nEXTRA_BROADCAST_RELAYS=\nSECRET_KEY={secret}\nTIMEOUT_MS=2000\n"
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    #[tokio::test]
    async fn run_feed_against_fake_relay() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let mut post = sample_event("aa11", 1);
        post.tags = den::post_tags("gaming");
        let relay_url = spawn_relay(vec![post], true).await;
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &relay_url, "");
        run(Cli {
            env: env_file,
            command: Commands::Feed {
                den: Some("gaming".into()),
                limit: 10,
                until: None,
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_post_publishes_signed_event() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let relay_url = spawn_relay(vec![], true).await;
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &relay_url, TEST_KEY);
        run(Cli {
            env: env_file,
            command: Commands::Post {
                den: "gaming".into(),
                content: "hello".into(),
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_post_without_identity_errors() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let relay_url = spawn_relay(vec![], true).await;
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &relay_url, "");
        let res = run(Cli {
            env: env_file,
            command: Commands::Post {
                den: "gaming".into(),
                content: "hello".into(),
            },
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn run_vote_fails_when_relay_rejects() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let relay_url = spawn_relay(vec![], false).await;
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &relay_url, TEST_KEY);
        let res = run(Cli {
            env: env_file,
            command: Commands::Vote {
                target: "aa11".into(),
                down: true,
            },
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn missing_env_file_gets_defaults() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_vars();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Whoami,
        })
        .await
        .unwrap_err(); // default env has no SECRET_KEY
        let data = fs::read_to_string(&env_path).unwrap();
        assert!(data.contains("RELAYS=wss://relay.ditto.pub"));
        assert!(data.contains("SECRET_KEY=\n"));
    }
}
