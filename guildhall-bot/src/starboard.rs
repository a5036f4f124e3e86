//! Starboard: mirrors heavily-starred messages into a board channel.
//!
//! The engine owns the only mapping from an original message to its mirror
//! post. Reaction events recompute the qualifying star count (the author's
//! own star never counts) and converge the mirror: create it when the count
//! reaches the threshold, refresh the tally while it stays above, delete it
//! when the count falls below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::{
    CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, CreateMessage, EditMessage, GetMessages,
};
use serenity::http::Http;
use serenity::model::channel::ReactionType;
use serenity::model::id::{ChannelId, MessageId, UserId};
use serenity::model::timestamp::Timestamp;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const STAR_EMOJI: &str = "⭐";

/// Star gold
const MIRROR_EMBED_COLOR: u32 = 0xFFAC33;

/// Snapshot of an original message, enough to render (or re-render) its
/// mirror. Built from the freshly fetched message on every event so edits
/// to the original flow into the mirror.
#[derive(Debug, Clone)]
pub struct MirrorSource {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub content: String,
    /// First image attachment, shown inline.
    pub image_url: Option<String>,
    /// First non-image attachment as (filename, url).
    pub attachment_link: Option<(String, String)>,
    pub jump_url: String,
    pub timestamp: DateTime<Utc>,
}

/// A rendered mirror payload handed to the board host.
#[derive(Debug, Clone)]
pub struct MirrorPost {
    pub source: MirrorSource,
    pub star_count: u32,
}

impl MirrorPost {
    /// Tally line shown above the embed: `⭐ **3** | <#channel>`.
    pub fn header(&self) -> String {
        format!(
            "{STAR_EMOJI} **{}** | <#{}>",
            self.star_count, self.source.channel_id
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The mirror (or original) message no longer exists.
    #[error("message not found")]
    NotFound,
    #[error("platform error: {0}")]
    Platform(String),
}

/// Board-channel operations the engine drives. Mocked in tests.
#[async_trait]
pub trait BoardHost: Send + Sync {
    /// Users who currently react with the star emoji on a message.
    async fn star_reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Vec<UserId>, BoardError>;

    async fn create_mirror(
        &self,
        board: ChannelId,
        post: &MirrorPost,
    ) -> Result<MessageId, BoardError>;

    async fn edit_mirror(
        &self,
        board: ChannelId,
        mirror: MessageId,
        post: &MirrorPost,
    ) -> Result<(), BoardError>;

    async fn delete_mirror(&self, board: ChannelId, mirror: MessageId) -> Result<(), BoardError>;
}

#[derive(Debug)]
struct StarEntry {
    /// `None` only transiently, between a failed edit and the recreate.
    mirror_message_id: Option<MessageId>,
    star_count: u32,
}

pub struct Starboard {
    host: Arc<dyn BoardHost>,
    board_channel: Option<ChannelId>,
    threshold: u32,
    /// Original message id -> live mirror. The lock is held across host
    /// calls, so updates for one message can never interleave; star volume
    /// is low enough that coarse serialization is the simple correct choice.
    entries: Mutex<HashMap<MessageId, StarEntry>>,
}

impl Starboard {
    pub fn new(host: Arc<dyn BoardHost>, board_channel: Option<ChannelId>, threshold: u32) -> Self {
        Self {
            host,
            board_channel,
            threshold: threshold.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn on_reaction_add(&self, source: &MirrorSource, reactor: UserId) {
        self.reconcile(source, reactor).await;
    }

    pub async fn on_reaction_remove(&self, source: &MirrorSource, reactor: UserId) {
        self.reconcile(source, reactor).await;
    }

    /// Recompute the qualifying count and converge the mirror state. Add
    /// and remove events share one path: either direction may cross the
    /// threshold, so both check both transitions.
    async fn reconcile(&self, source: &MirrorSource, reactor: UserId) {
        let Some(board) = self.board_channel else {
            return;
        };
        if reactor == source.author_id {
            debug!(
                message = source.message_id.get(),
                "ignoring self-star from message author"
            );
            return;
        }
        // Never mirror the board channel into itself.
        if source.channel_id == board {
            return;
        }

        let count = match self
            .host
            .star_reactors(source.channel_id, source.message_id)
            .await
        {
            Ok(users) => users.into_iter().filter(|u| *u != source.author_id).count() as u32,
            Err(e) => {
                error!(
                    message = source.message_id.get(),
                    "failed to fetch star reactions: {e}"
                );
                return;
            }
        };

        let mut entries = self.entries.lock().await;
        if count >= self.threshold {
            self.upsert_mirror(&mut entries, board, source, count).await;
        } else {
            self.retire_mirror(&mut entries, board, source.message_id)
                .await;
        }
    }

    async fn upsert_mirror(
        &self,
        entries: &mut HashMap<MessageId, StarEntry>,
        board: ChannelId,
        source: &MirrorSource,
        count: u32,
    ) {
        let post = MirrorPost {
            source: source.clone(),
            star_count: count,
        };

        if let Some(entry) = entries.get_mut(&source.message_id) {
            entry.star_count = count;
            if let Some(mirror) = entry.mirror_message_id {
                match self.host.edit_mirror(board, mirror, &post).await {
                    Ok(()) => {
                        debug!(
                            message = source.message_id.get(),
                            stars = count,
                            "updated starboard mirror"
                        );
                        return;
                    }
                    Err(BoardError::NotFound) => {
                        // Someone deleted the mirror out from under us;
                        // recreate rather than dropping the entry.
                        debug!(
                            message = source.message_id.get(),
                            "mirror gone, recreating"
                        );
                        entry.mirror_message_id = None;
                    }
                    Err(e) => {
                        error!(
                            message = source.message_id.get(),
                            "failed to update starboard mirror: {e}"
                        );
                        return;
                    }
                }
            }
            match self.host.create_mirror(board, &post).await {
                Ok(mirror) => {
                    entry.mirror_message_id = Some(mirror);
                    info!(
                        message = source.message_id.get(),
                        mirror = mirror.get(),
                        stars = count,
                        "recreated starboard mirror"
                    );
                }
                Err(e) => error!(
                    message = source.message_id.get(),
                    "failed to recreate starboard mirror: {e}"
                ),
            }
            return;
        }

        match self.host.create_mirror(board, &post).await {
            Ok(mirror) => {
                entries.insert(
                    source.message_id,
                    StarEntry {
                        mirror_message_id: Some(mirror),
                        star_count: count,
                    },
                );
                info!(
                    message = source.message_id.get(),
                    mirror = mirror.get(),
                    stars = count,
                    "created starboard mirror"
                );
            }
            Err(e) => error!(
                message = source.message_id.get(),
                "failed to create starboard mirror: {e}"
            ),
        }
    }

    async fn retire_mirror(
        &self,
        entries: &mut HashMap<MessageId, StarEntry>,
        board: ChannelId,
        original: MessageId,
    ) {
        let Some(entry) = entries.remove(&original) else {
            return;
        };
        let Some(mirror) = entry.mirror_message_id else {
            return;
        };
        match self.host.delete_mirror(board, mirror).await {
            Ok(()) | Err(BoardError::NotFound) => info!(
                message = original.get(),
                mirror = mirror.get(),
                "removed starboard mirror"
            ),
            // The entry is already gone; a stray mirror is the lesser evil
            // compared to resurrecting a stale entry.
            Err(e) => warn!(
                message = original.get(),
                "failed to delete starboard mirror: {e}"
            ),
        }
    }

    /// Number of live mirrors, for the status log line.
    pub async fn live_mirrors(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Render the mirror embed for a post.
pub fn render_mirror_embed(post: &MirrorPost) -> CreateEmbed {
    let source = &post.source;
    let mut author = CreateEmbedAuthor::new(&source.author_name);
    if let Some(url) = &source.author_avatar_url {
        author = author.icon_url(url);
    }

    let mut embed = CreateEmbed::new()
        .color(MIRROR_EMBED_COLOR)
        .author(author)
        .field(
            "Original",
            format!("[Jump to message]({})", source.jump_url),
            false,
        )
        .footer(CreateEmbedFooter::new(format!(
            "Message ID: {}",
            source.message_id
        )))
        .timestamp(Timestamp::from(source.timestamp));

    if !source.content.is_empty() {
        embed = embed.description(&source.content);
    }
    if let Some(image) = &source.image_url {
        embed = embed.image(image);
    } else if let Some((filename, url)) = &source.attachment_link {
        embed = embed.field("Attachment", format!("[{filename}]({url})"), false);
    }

    embed
}

pub struct DiscordBoardHost {
    http: Arc<Http>,
}

impl DiscordBoardHost {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn map_err(err: serenity::Error) -> BoardError {
        if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(ref resp)) = err
            && resp.status_code == serenity::http::StatusCode::NOT_FOUND
        {
            return BoardError::NotFound;
        }
        BoardError::Platform(err.to_string())
    }
}

#[async_trait]
impl BoardHost for DiscordBoardHost {
    async fn star_reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Vec<UserId>, BoardError> {
        let star = ReactionType::Unicode(STAR_EMOJI.to_string());
        let mut reactors = Vec::new();
        let mut after: Option<UserId> = None;
        // Reaction listing pages at 100 users.
        loop {
            let batch = self
                .http
                .get_reaction_users(channel, message, &star, 100, after.map(UserId::get))
                .await
                .map_err(Self::map_err)?;
            let full_page = batch.len() == 100;
            after = batch.last().map(|u| u.id);
            reactors.extend(batch.into_iter().map(|u| u.id));
            if !full_page {
                break;
            }
        }
        Ok(reactors)
    }

    async fn create_mirror(
        &self,
        board: ChannelId,
        post: &MirrorPost,
    ) -> Result<MessageId, BoardError> {
        let message = board
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(post.header())
                    .embed(render_mirror_embed(post)),
            )
            .await
            .map_err(Self::map_err)?;
        Ok(message.id)
    }

    async fn edit_mirror(
        &self,
        board: ChannelId,
        mirror: MessageId,
        post: &MirrorPost,
    ) -> Result<(), BoardError> {
        board
            .edit_message(
                &self.http,
                mirror,
                EditMessage::new()
                    .content(post.header())
                    .embed(render_mirror_embed(post)),
            )
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete_mirror(&self, board: ChannelId, mirror: MessageId) -> Result<(), BoardError> {
        board
            .delete_message(&self.http, mirror)
            .await
            .map_err(Self::map_err)
    }
}

/// Walk board-channel history between two posts (inclusive) and collect the
/// unique embed author names, oldest-first paging from the newer end.
/// Used by the `/starboard-report` staff command.
pub async fn collect_board_authors(
    http: &Http,
    board: ChannelId,
    start: MessageId,
    end: MessageId,
) -> Result<Vec<String>, BoardError> {
    let fetch = |id: MessageId| board.message(http, id);
    let start_msg = fetch(start).await.map_err(DiscordBoardHost::map_err)?;
    let end_msg = fetch(end).await.map_err(DiscordBoardHost::map_err)?;

    // Accept the links in either order.
    let (older, newer) = if start_msg.timestamp > end_msg.timestamp {
        (end_msg, start_msg)
    } else {
        (start_msg, end_msg)
    };

    let mut names: Vec<String> = Vec::new();
    let mut push_name = |name: Option<String>| {
        if let Some(name) = name
            && !names.iter().any(|n| n.eq_ignore_ascii_case(&name))
        {
            names.push(name);
        }
    };

    push_name(embed_author(&newer));
    push_name(embed_author(&older));

    let mut before = newer.id;
    'outer: loop {
        let batch = board
            .messages(http, GetMessages::new().before(before).limit(100))
            .await
            .map_err(DiscordBoardHost::map_err)?;
        if batch.is_empty() {
            break;
        }
        for message in &batch {
            if message.timestamp <= older.timestamp {
                break 'outer;
            }
            push_name(embed_author(message));
            before = message.id;
        }
    }

    names.sort_by_key(|n| n.to_lowercase());
    Ok(names)
}

fn embed_author(message: &serenity::model::channel::Message) -> Option<String> {
    message
        .embeds
        .first()
        .and_then(|e| e.author.as_ref())
        .map(|a| a.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBoardHost;

    const BOARD: ChannelId = ChannelId::new(900);

    fn source(message_id: u64, channel_id: u64, author_id: u64) -> MirrorSource {
        MirrorSource {
            message_id: MessageId::new(message_id),
            channel_id: ChannelId::new(channel_id),
            author_id: UserId::new(author_id),
            author_name: "Mira".to_string(),
            author_avatar_url: None,
            content: "the dragon is *behind* you".to_string(),
            image_url: None,
            attachment_link: None,
            jump_url: "https://discord.com/channels/1/10/100".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn board(host: Arc<MockBoardHost>, threshold: u32) -> Starboard {
        Starboard::new(host, Some(BOARD), threshold)
    }

    #[tokio::test]
    async fn test_threshold_crossing_creates_then_deletes() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 3);
        let src = source(100, 10, 1);

        // Two qualifying stars: below threshold, no mirror.
        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_add(&src, UserId::new(3)).await;
        assert_eq!(host.created_count(), 0);

        // Third star crosses the threshold.
        host.set_reactors(src.message_id, &[2, 3, 4]);
        engine.on_reaction_add(&src, UserId::new(4)).await;
        assert_eq!(host.created_count(), 1);
        assert_eq!(host.last_post_stars(), Some(3));
        assert_eq!(engine.live_mirrors().await, 1);

        // A removal drops it back below: mirror deleted, entry gone.
        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_remove(&src, UserId::new(4)).await;
        assert_eq!(host.deleted_count(), 1);
        assert_eq!(engine.live_mirrors().await, 0);
    }

    #[tokio::test]
    async fn test_self_star_never_counts() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 2);
        let src = source(100, 10, 1);

        // The author's own star is a no-op before any fetch happens.
        engine.on_reaction_add(&src, UserId::new(1)).await;
        assert_eq!(host.reactor_fetches(), 0);

        // Author + one other reactor: qualifying count is 1, not 2.
        host.set_reactors(src.message_id, &[1, 2]);
        engine.on_reaction_add(&src, UserId::new(2)).await;
        assert_eq!(host.created_count(), 0);

        host.set_reactors(src.message_id, &[1, 2, 3]);
        engine.on_reaction_add(&src, UserId::new(3)).await;
        assert_eq!(host.created_count(), 1);
        assert_eq!(host.last_post_stars(), Some(2));
    }

    #[tokio::test]
    async fn test_board_channel_messages_are_never_mirrored() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 1);
        let src = source(100, BOARD.get(), 1);

        host.set_reactors(src.message_id, &[2, 3, 4]);
        engine.on_reaction_add(&src, UserId::new(2)).await;
        assert_eq!(host.created_count(), 0);
    }

    #[tokio::test]
    async fn test_mirror_updated_in_place_stays_unique() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 2);
        let src = source(100, 10, 1);

        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_add(&src, UserId::new(3)).await;
        host.set_reactors(src.message_id, &[2, 3, 4]);
        engine.on_reaction_add(&src, UserId::new(4)).await;
        host.set_reactors(src.message_id, &[2, 3, 4, 5]);
        engine.on_reaction_add(&src, UserId::new(5)).await;

        // One creation, the rest in-place edits with a fresh tally.
        assert_eq!(host.created_count(), 1);
        assert_eq!(host.edit_count(), 2);
        assert_eq!(host.last_post_stars(), Some(4));
        assert_eq!(engine.live_mirrors().await, 1);
    }

    #[tokio::test]
    async fn test_externally_deleted_mirror_is_recreated() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 2);
        let src = source(100, 10, 1);

        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_add(&src, UserId::new(3)).await;
        assert_eq!(host.created_count(), 1);

        // Simulate a moderator deleting the mirror by hand.
        host.fail_next_edit_not_found();
        host.set_reactors(src.message_id, &[2, 3, 4]);
        engine.on_reaction_add(&src, UserId::new(4)).await;

        assert_eq!(host.created_count(), 2);
        assert_eq!(engine.live_mirrors().await, 1);
    }

    #[tokio::test]
    async fn test_add_event_below_threshold_retires_mirror() {
        // Threshold raised between events, or reactors vanished between the
        // gateway event and the fetch: an add event can also observe a
        // below-threshold count and must retire the mirror.
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 2);
        let src = source(100, 10, 1);

        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_add(&src, UserId::new(3)).await;
        assert_eq!(engine.live_mirrors().await, 1);

        host.set_reactors(src.message_id, &[2]);
        engine.on_reaction_add(&src, UserId::new(4)).await;
        assert_eq!(host.deleted_count(), 1);
        assert_eq!(engine.live_mirrors().await, 0);
    }

    #[tokio::test]
    async fn test_no_board_channel_disables_engine() {
        let host = Arc::new(MockBoardHost::default());
        let engine = Starboard::new(Arc::clone(&host), None, 1);
        let src = source(100, 10, 1);

        host.set_reactors(src.message_id, &[2, 3]);
        engine.on_reaction_add(&src, UserId::new(2)).await;
        assert_eq!(host.reactor_fetches(), 0);
        assert_eq!(host.created_count(), 0);
    }

    #[tokio::test]
    async fn test_reactor_fetch_failure_drops_event() {
        let host = Arc::new(MockBoardHost::default());
        let engine = board(Arc::clone(&host), 1);
        let src = source(100, 10, 1);

        host.fail_next_reactor_fetch();
        engine.on_reaction_add(&src, UserId::new(2)).await;
        assert_eq!(host.created_count(), 0);
        assert_eq!(engine.live_mirrors().await, 0);
    }
}
