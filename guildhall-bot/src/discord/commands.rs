//! Staff slash commands: gifting, managed messages, role setup, reports.

use std::sync::LazyLock;

use regex::Regex;
use serenity::builder::{
    CreateActionRow, CreateButton, CreateCommand, CreateCommandOption, CreateEmbed,
    CreateInputText, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    CreateModal, EditInteractionResponse,
};
use serenity::model::Permissions;
use serenity::model::application::{ButtonStyle, CommandInteraction, CommandOptionType, InputTextStyle};
use serenity::model::id::{ChannelId, MessageId};
use serenity::prelude::*;
use tracing::{error, info};

use guildhall_core::RoleSet;

use crate::starboard;

use super::Bot;

static MESSAGE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"channels/(\d+)/(\d+)/(\d+)").unwrap());
static CHANNEL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"channels/(\d+)/(\d+)").unwrap());

/// Parse a Discord message URL, or a bare message id with a fallback channel.
pub(super) fn parse_message_link(
    input: &str,
    fallback_channel: Option<ChannelId>,
) -> Option<(ChannelId, MessageId)> {
    if let Some(caps) = MESSAGE_LINK.captures(input) {
        let channel = caps[2].parse().ok()?;
        let message = caps[3].parse().ok()?;
        return Some((ChannelId::new(channel), MessageId::new(message)));
    }
    if input.chars().all(|c| c.is_ascii_digit()) && !input.is_empty() {
        let message = input.parse().ok()?;
        return Some((fallback_channel?, MessageId::new(message)));
    }
    None
}

/// Parse a channel/thread URL or a bare channel id.
pub(super) fn parse_channel_link(input: &str) -> Option<ChannelId> {
    if let Some(caps) = CHANNEL_LINK.captures(input) {
        return caps[2].parse().ok().map(ChannelId::new);
    }
    if input.chars().all(|c| c.is_ascii_digit()) && !input.is_empty() {
        return input.parse().ok().map(ChannelId::new);
    }
    None
}

/// All slash commands, registered globally on `ready`.
pub(super) fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("gift-subscription")
            .description("Grant a gift subscription to a user (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::User,
                    "user",
                    "The user to receive the gift subscription",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "duration",
                    "How long the gift subscription should last",
                )
                .add_string_choice("1 Month", "1_month")
                .add_string_choice("3 Months", "3_months")
                .add_string_choice("6 Months", "6_months")
                .add_string_choice("1 Year", "1_year")
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "reason",
                "Reason for the gift (optional)",
            )),
        CreateCommand::new("message-send")
            .description("Send a message to a channel or thread via the bot (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "channel_url",
                "Channel/thread URL or ID (defaults to current channel)",
            )),
        CreateCommand::new("message-post")
            .description("Create a forum post via the bot (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Channel,
                    "forum",
                    "The forum channel to post in",
                )
                .required(true),
            ),
        CreateCommand::new("message-edit")
            .description("Edit a bot message (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "message_url",
                    "Discord message URL or message ID",
                )
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::Channel,
                "channel",
                "Channel where the message is (required if using a message ID)",
            )),
        CreateCommand::new("message-delete")
            .description("Delete a bot message (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "message_url",
                    "Discord message URL or message ID",
                )
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::Channel,
                "channel",
                "Channel where the message is (required if using a message ID)",
            )),
        CreateCommand::new("setup-roles")
            .description("Post self-serve role button messages here (staff only)")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "set",
                    "Which role set to post",
                )
                .add_string_choice("Pronouns", "pronouns")
                .add_string_choice("PM/DM Preferences", "pm")
                .add_string_choice("Interests", "interests")
                .add_string_choice("Regions", "regions")
                .add_string_choice("All configured sets", "all")
                .required(true),
            ),
        CreateCommand::new("starboard-report")
            .description("List unique starred authors between two starboard posts")
            .default_member_permissions(Permissions::MANAGE_ROLES)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "start",
                    "Link to the first (older) starboard message",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "end",
                    "Link to the second (newer) starboard message",
                )
                .required(true),
            ),
    ]
}

/// Ephemeral first response.
pub(super) async fn ephemeral_reply(ctx: &Context, command: &CommandInteraction, text: &str) {
    let _ = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await;
}

/// Edit of a deferred ephemeral response.
async fn edit_reply(ctx: &Context, command: &CommandInteraction, text: &str) {
    let _ = command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await;
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

impl Bot {
    /// Gate a command on the configured staff role. Replies (ephemeral) and
    /// returns false when the caller doesn't qualify.
    pub(super) async fn require_staff(&self, ctx: &Context, command: &CommandInteraction) -> bool {
        let Some(staff_role) = self.state.config.staff_role_id else {
            // No staff role configured: fall back to the command's own
            // default permission gate.
            return true;
        };
        let is_staff = command
            .member
            .as_ref()
            .is_some_and(|m| m.roles.iter().any(|r| r.get() == staff_role));
        if !is_staff {
            ephemeral_reply(
                ctx,
                command,
                "You do not have permission to use this command. Staff role required.",
            )
            .await;
        }
        is_staff
    }

    pub(super) async fn handle_gift_subscription(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
    ) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let _ = command.defer_ephemeral(&ctx.http).await;

        let Some(target) = command
            .data
            .options
            .iter()
            .find(|o| o.name == "user")
            .and_then(|o| o.value.as_user_id())
        else {
            edit_reply(ctx, command, "Please specify a user.").await;
            return;
        };
        let Some(duration) = option_str(command, "duration") else {
            edit_reply(ctx, command, "Please specify a duration.").await;
            return;
        };
        let reason = option_str(command, "reason")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Gifted by {}", command.user.name));

        info!(
            staff = command.user.id.get(),
            recipient = target.get(),
            duration,
            "Processing gift subscription request"
        );

        match self
            .state
            .backend
            .gift_subscription(&target.to_string(), duration, &reason)
            .await
        {
            Ok(expires_at) => {
                let duration_name = match duration {
                    "1_month" => "1 month",
                    "3_months" => "3 months",
                    "6_months" => "6 months",
                    "1_year" => "1 year",
                    other => other,
                };
                self.state
                    .backend
                    .audit_log(
                        &target.to_string(),
                        "gift_subscription",
                        serde_json::json!({
                            "staffId": command.user.id.to_string(),
                            "duration": duration,
                            "reason": reason,
                        }),
                    )
                    .await;
                edit_reply(
                    ctx,
                    command,
                    &format!(
                        "✅ **Gift subscription granted!**\n\n\
                         **User:** <@{}>\n\
                         **Duration:** {}\n\
                         **Expires:** <t:{}:F>\n\
                         **Reason:** {}\n\n\
                         The user has been granted the subscriber role and \
                         will receive a welcome DM.",
                        target.get(),
                        duration_name,
                        expires_at.timestamp(),
                        reason
                    ),
                )
                .await;
            }
            Err(e) => {
                error!(recipient = target.get(), "Gift subscription failed: {e}");
                let detail = match e.status() {
                    Some(400) => "Invalid request.",
                    Some(401) => "Authentication failed. Check BACKEND_API_TOKEN configuration.",
                    Some(_) => "The backend rejected the request. Check the logs.",
                    None => "Could not connect to the backend API. Is it running?",
                };
                edit_reply(
                    ctx,
                    command,
                    &format!("❌ Failed to grant gift subscription. {detail}"),
                )
                .await;
            }
        }
    }

    pub(super) async fn handle_message_send(&self, ctx: &Context, command: &CommandInteraction) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let channel = match option_str(command, "channel_url") {
            Some(raw) => match parse_channel_link(raw) {
                Some(channel) => channel,
                None => {
                    ephemeral_reply(ctx, command, "Invalid channel URL or ID.").await;
                    return;
                }
            },
            None => command.channel_id,
        };

        let modal = CreateModal::new(format!("gh:msgsend:{}", channel.get()), "Send Message")
            .components(vec![CreateActionRow::InputText(CreateInputText::new(
                InputTextStyle::Paragraph,
                "Message content",
                "content",
            ))]);
        let _ = command
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await;
    }

    pub(super) async fn handle_message_post(&self, ctx: &Context, command: &CommandInteraction) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let Some(forum) = command
            .data
            .options
            .iter()
            .find(|o| o.name == "forum")
            .and_then(|o| o.value.as_channel_id())
        else {
            ephemeral_reply(ctx, command, "Please specify a forum channel.").await;
            return;
        };

        let modal = CreateModal::new(format!("gh:msgpost:{}", forum.get()), "Create Forum Post")
            .components(vec![
                CreateActionRow::InputText(CreateInputText::new(
                    InputTextStyle::Short,
                    "Post title",
                    "title",
                )),
                CreateActionRow::InputText(CreateInputText::new(
                    InputTextStyle::Paragraph,
                    "Post content",
                    "content",
                )),
            ]);
        let _ = command
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await;
    }

    pub(super) async fn handle_message_edit(&self, ctx: &Context, command: &CommandInteraction) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let fallback = command
            .data
            .options
            .iter()
            .find(|o| o.name == "channel")
            .and_then(|o| o.value.as_channel_id());
        let Some((channel, message)) = option_str(command, "message_url")
            .and_then(|raw| parse_message_link(raw, fallback))
        else {
            ephemeral_reply(
                ctx,
                command,
                "Invalid message URL or ID. Provide a message URL, or a \
                 message ID together with its channel.",
            )
            .await;
            return;
        };

        let modal = CreateModal::new(
            format!("gh:msgedit:{}:{}", channel.get(), message.get()),
            "Edit Message",
        )
        .components(vec![CreateActionRow::InputText(CreateInputText::new(
            InputTextStyle::Paragraph,
            "New content",
            "content",
        ))]);
        let _ = command
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await;
    }

    pub(super) async fn handle_message_delete(&self, ctx: &Context, command: &CommandInteraction) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let _ = command.defer_ephemeral(&ctx.http).await;

        let fallback = command
            .data
            .options
            .iter()
            .find(|o| o.name == "channel")
            .and_then(|o| o.value.as_channel_id());
        let Some((channel, message)) = option_str(command, "message_url")
            .and_then(|raw| parse_message_link(raw, fallback))
        else {
            edit_reply(
                ctx,
                command,
                "Invalid message URL or ID. Provide a message URL, or a \
                 message ID together with its channel.",
            )
            .await;
            return;
        };

        match channel.delete_message(&ctx.http, message).await {
            Ok(()) => {
                info!(
                    staff = command.user.id.get(),
                    message = message.get(),
                    "Deleted managed message"
                );
                edit_reply(ctx, command, "🗑️ Message deleted.").await;
            }
            Err(e) => {
                error!(message = message.get(), "Failed to delete message: {e}");
                edit_reply(
                    ctx,
                    command,
                    "❌ Could not delete that message. Check that the link is \
                     correct and that the bot can manage messages there.",
                )
                .await;
            }
        }
    }

    pub(super) async fn handle_setup_roles(&self, ctx: &Context, command: &CommandInteraction) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let _ = command.defer_ephemeral(&ctx.http).await;

        let selection = option_str(command, "set").unwrap_or("all");
        let sets: Vec<&RoleSet> = self
            .state
            .config
            .role_sets
            .iter()
            .filter(|s| selection == "all" || s.key == selection)
            .collect();

        if sets.is_empty() {
            edit_reply(
                ctx,
                command,
                "❌ No roles configured for that set. Set the DISCORD_*_ROLE_ID \
                 environment variables first.",
            )
            .await;
            return;
        }

        let mut posted = Vec::new();
        for set in sets {
            match command
                .channel_id
                .send_message(&ctx.http, role_set_message(set))
                .await
            {
                Ok(message) => {
                    info!(
                        set = %set.key,
                        message = message.id.get(),
                        "Set up role buttons"
                    );
                    posted.push(format!("{}: {}", set.title, message.link()));
                }
                Err(e) => {
                    error!(set = %set.key, "Failed to post role buttons: {e}");
                    posted.push(format!("{}: failed ({e})", set.title));
                }
            }
        }

        edit_reply(
            ctx,
            command,
            &format!(
                "✅ **Button roles set up!**\n\n{}\n\nUsers can now click \
                 buttons to self-assign roles.",
                posted.join("\n")
            ),
        )
        .await;
    }

    pub(super) async fn handle_starboard_report(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
    ) {
        if !self.require_staff(ctx, command).await {
            return;
        }
        let _ = command.defer_ephemeral(&ctx.http).await;

        let Some(board) = self.state.config.starboard_channel_id.map(ChannelId::new) else {
            edit_reply(ctx, command, "❌ Starboard channel is not configured.").await;
            return;
        };

        let start = option_str(command, "start").and_then(|raw| parse_message_link(raw, None));
        let end = option_str(command, "end").and_then(|raw| parse_message_link(raw, None));
        let (Some((_, start)), Some((_, end))) = (start, end) else {
            edit_reply(
                ctx,
                command,
                "❌ Invalid message links. Please provide valid Discord message links.",
            )
            .await;
            return;
        };

        let names = match starboard::collect_board_authors(&ctx.http, board, start, end).await {
            Ok(names) => names,
            Err(e) => {
                error!("Starboard report failed: {e}");
                edit_reply(
                    ctx,
                    command,
                    "❌ Could not read that range. Make sure both links point \
                     at starboard messages.",
                )
                .await;
                return;
            }
        };

        if names.is_empty() {
            edit_reply(ctx, command, "❌ No starred authors found in that range.").await;
            return;
        }

        let header = format!("**⭐ Starred authors ({} unique)**", names.len());
        let list = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{}. {}", i + 1, name))
            .collect::<Vec<_>>();

        // Stay under the 2000-char message limit; overflow goes to
        // follow-up messages.
        let mut chunks = vec![header];
        for line in list {
            match chunks.last_mut() {
                Some(chunk) if chunk.len() + line.len() + 1 <= 1900 => {
                    chunk.push('\n');
                    chunk.push_str(&line);
                }
                _ => chunks.push(line),
            }
        }
        edit_reply(ctx, command, &chunks[0]).await;
        for chunk in &chunks[1..] {
            let _ = command
                .create_followup(
                    &ctx.http,
                    serenity::builder::CreateInteractionResponseFollowup::new()
                        .content(chunk)
                        .ephemeral(true),
                )
                .await;
        }

        info!(
            staff = command.user.id.get(),
            authors = names.len(),
            "Generated starboard report"
        );
    }
}

/// Build the embed + button rows for one role set.
fn role_set_message(set: &RoleSet) -> CreateMessage {
    let embed = CreateEmbed::new()
        .color(0xB8860B) // guild gold
        .title(&set.title)
        .description(&set.description);

    let mut rows = Vec::new();
    // Discord allows at most 5 buttons per row.
    for chunk in set.roles.chunks(5) {
        let buttons = chunk
            .iter()
            .map(|role| {
                let mut button = CreateButton::new(format!("gh:role:{}:{}", set.key, role.role_id))
                    .label(&role.label)
                    .style(ButtonStyle::Primary);
                if let Some(emoji) = &role.emoji {
                    button = button.emoji(serenity::model::channel::ReactionType::Unicode(
                        emoji.clone(),
                    ));
                }
                button
            })
            .collect();
        rows.push(CreateActionRow::Buttons(buttons));
    }

    CreateMessage::new().embed(embed).components(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_link_accepts_urls_and_ids() {
        let link = "https://discord.com/channels/111/222/333";
        assert_eq!(
            parse_message_link(link, None),
            Some((ChannelId::new(222), MessageId::new(333)))
        );

        // Bare id needs a fallback channel.
        assert_eq!(
            parse_message_link("333", Some(ChannelId::new(222))),
            Some((ChannelId::new(222), MessageId::new(333)))
        );
        assert_eq!(parse_message_link("333", None), None);
        assert_eq!(parse_message_link("not a link", None), None);
    }

    #[test]
    fn test_parse_channel_link_accepts_urls_and_ids() {
        assert_eq!(
            parse_channel_link("https://discord.com/channels/111/222"),
            Some(ChannelId::new(222))
        );
        // Message links resolve to their channel.
        assert_eq!(
            parse_channel_link("https://discord.com/channels/111/222/333"),
            Some(ChannelId::new(222))
        );
        assert_eq!(parse_channel_link("444"), Some(ChannelId::new(444)));
        assert_eq!(parse_channel_link("garbage"), None);
    }

    #[test]
    fn test_command_definitions_cover_the_staff_surface() {
        let names: Vec<String> = command_definitions()
            .iter()
            .map(|c| {
                serde_json::to_value(c).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert!(names.contains(&"gift-subscription".to_string()));
        assert!(names.contains(&"setup-roles".to_string()));
        assert!(names.contains(&"starboard-report".to_string()));
        assert_eq!(names.len(), 7);
    }
}
