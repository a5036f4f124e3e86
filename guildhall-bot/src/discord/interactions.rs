//! Component and modal dispatch.
//!
//! Serenity requires a single `EventHandler` impl, so this file provides
//! the `interaction_create` body as methods on `Bot` that the main
//! EventHandler impl in `bot.rs` delegates to.

use serenity::builder::EditInteractionResponse;
use serenity::model::application::{
    ActionRowComponent, ComponentInteraction, Interaction, ModalInteraction,
};
use serenity::model::id::RoleId;
use serenity::prelude::*;
use tracing::{error, info, warn};

use guildhall_core::RoleSet;

use super::Bot;
use super::identity;

impl Bot {
    pub(super) async fn handle_interaction(&self, ctx: Context, interaction: Interaction) {
        if let Some(component) = interaction.as_message_component() {
            if let Some(rest) = component.data.custom_id.strip_prefix("gh:role:") {
                self.handle_role_button(&ctx, component, rest).await;
            }
            return;
        }

        if let Some(modal) = interaction.as_modal_submit() {
            self.handle_modal(&ctx, modal).await;
            return;
        }

        if let Some(command) = interaction.as_command() {
            match command.data.name.as_str() {
                "gift-subscription" => self.handle_gift_subscription(&ctx, command).await,
                "message-send" => self.handle_message_send(&ctx, command).await,
                "message-post" => self.handle_message_post(&ctx, command).await,
                "message-edit" => self.handle_message_edit(&ctx, command).await,
                "message-delete" => self.handle_message_delete(&ctx, command).await,
                "setup-roles" => self.handle_setup_roles(&ctx, command).await,
                "starboard-report" => self.handle_starboard_report(&ctx, command).await,
                _ => {}
            }
        }
    }

    /// Self-serve role buttons: custom id `gh:role:{set_key}:{role_id}`.
    /// One handler covers every set; the set's `exclusive` flag picks
    /// toggle or pick-one semantics.
    async fn handle_role_button(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
        rest: &str,
    ) {
        let Some((set_key, role_raw)) = rest.split_once(':') else {
            return;
        };
        let Some(role_id) = role_raw.parse::<u64>().ok().filter(|v| *v != 0) else {
            return;
        };
        let role = RoleId::new(role_id);

        let Some(set) = self.state.config.role_set(set_key) else {
            warn!(set_key, "Role button for an unconfigured set");
            let _ = component.defer_ephemeral(&ctx.http).await;
            self.edit_component_reply(
                ctx,
                component,
                "This role menu is no longer configured. Please contact a staff member.",
            )
            .await;
            return;
        };
        let Some(guild_id) = component.guild_id else {
            return;
        };
        let Some(member) = component.member.as_ref() else {
            return;
        };

        let _ = component.defer_ephemeral(&ctx.http).await;

        let has_role = member.roles.contains(&role);
        let result = if set.exclusive {
            self.apply_exclusive(ctx, set, component, role, has_role).await
        } else if has_role {
            ctx.http
                .remove_member_role(guild_id, component.user.id, role, Some("Self-serve role button"))
                .await
                .map(|()| "✅ Removed the role!")
        } else {
            ctx.http
                .add_member_role(guild_id, component.user.id, role, Some("Self-serve role button"))
                .await
                .map(|()| "✅ Added the role!")
        };

        match result {
            Ok(reply) => {
                info!(
                    user = component.user.id.get(),
                    role = role.get(),
                    set = %set.key,
                    "Updated self-serve role"
                );
                self.edit_component_reply(ctx, component, reply).await;
            }
            Err(e) => {
                // Usually a role-hierarchy problem the operator has to fix.
                error!(
                    user = component.user.id.get(),
                    role = role.get(),
                    "Failed to update self-serve role: {e}"
                );
                self.edit_component_reply(
                    ctx,
                    component,
                    "Failed to update your role. Please contact a staff member.",
                )
                .await;
            }
        }
    }

    /// Pick-one semantics: clear every role in the set, then add the
    /// selection unless the member was toggling it off.
    async fn apply_exclusive(
        &self,
        ctx: &Context,
        set: &RoleSet,
        component: &ComponentInteraction,
        role: RoleId,
        had_role: bool,
    ) -> Result<&'static str, serenity::Error> {
        let guild_id = component.guild_id.expect("checked by caller");
        let member = component.member.as_ref().expect("checked by caller");

        for sibling in &set.roles {
            let sibling = RoleId::new(sibling.role_id);
            if member.roles.contains(&sibling) {
                ctx.http
                    .remove_member_role(
                        guild_id,
                        component.user.id,
                        sibling,
                        Some("Self-serve role button"),
                    )
                    .await?;
            }
        }

        if had_role {
            return Ok("✅ Removed your preference!");
        }
        ctx.http
            .add_member_role(guild_id, component.user.id, role, Some("Self-serve role button"))
            .await?;
        Ok("✅ Updated your preference!")
    }

    async fn edit_component_reply(
        &self,
        ctx: &Context,
        component: &ComponentInteraction,
        text: &str,
    ) {
        let _ = component
            .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
            .await;
    }

    /// Managed-message modals: `gh:msgsend:{channel}`, `gh:msgpost:{forum}`,
    /// `gh:msgedit:{channel}:{message}`.
    async fn handle_modal(&self, ctx: &Context, modal: &ModalInteraction) {
        let custom_id = modal.data.custom_id.clone();
        let Some(rest) = custom_id.strip_prefix("gh:") else {
            return;
        };

        let _ = modal.defer_ephemeral(&ctx.http).await;

        let content = modal_input(modal, "content").unwrap_or_default();
        if content.trim().is_empty() {
            self.edit_modal_reply(ctx, modal, "Message content cannot be empty.")
                .await;
            return;
        }

        if let Some(raw) = rest.strip_prefix("msgsend:") {
            let Some(channel) = super::commands::parse_channel_link(raw) else {
                return;
            };
            match identity::post_as_persona(&ctx.http, &self.state.config, channel, &content).await
            {
                Ok(message) => {
                    info!(
                        user = modal.user.id.get(),
                        channel = channel.get(),
                        message = message.id.get(),
                        "Sent managed message via webhook"
                    );
                    self.edit_modal_reply(
                        ctx,
                        modal,
                        &format!(
                            "Message sent successfully!\n\n**Message link:** {}\n\n\
                             Save this link to edit or delete the message later.",
                            message.link()
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    error!("Error sending managed message: {e}");
                    self.edit_modal_reply(
                        ctx,
                        modal,
                        "An error occurred while sending the message. Please try again.",
                    )
                    .await;
                }
            }
            return;
        }

        if let Some(raw) = rest.strip_prefix("msgpost:") {
            let Some(forum) = super::commands::parse_channel_link(raw) else {
                return;
            };
            let title = modal_input(modal, "title").unwrap_or_default();
            if title.trim().is_empty() {
                self.edit_modal_reply(ctx, modal, "Post title cannot be empty.")
                    .await;
                return;
            }
            match identity::post_forum_thread(&ctx.http, &self.state.config, forum, &title, &content)
                .await
            {
                Ok(message) => {
                    info!(
                        user = modal.user.id.get(),
                        forum = forum.get(),
                        thread = message.channel_id.get(),
                        "Created forum post via webhook"
                    );
                    self.edit_modal_reply(
                        ctx,
                        modal,
                        &format!(
                            "Forum post created successfully!\n\n\
                             **First message link:** {}\n\n\
                             Save this link to edit or delete later.",
                            message.link()
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    error!("Error creating forum post: {e}");
                    self.edit_modal_reply(
                        ctx,
                        modal,
                        "An error occurred while creating the forum post. Please try again.",
                    )
                    .await;
                }
            }
            return;
        }

        if let Some(raw) = rest.strip_prefix("msgedit:") {
            let Some((channel_raw, message_raw)) = raw.split_once(':') else {
                return;
            };
            let Some((channel, message)) = channel_raw
                .parse()
                .ok()
                .zip(message_raw.parse().ok())
                .map(|(c, m): (u64, u64)| {
                    (
                        serenity::model::id::ChannelId::new(c),
                        serenity::model::id::MessageId::new(m),
                    )
                })
            else {
                return;
            };

            match identity::edit_managed_message(&ctx.http, channel, message, &content).await {
                Ok(()) => {
                    info!(
                        user = modal.user.id.get(),
                        message = message.get(),
                        "Edited managed message via modal"
                    );
                    self.edit_modal_reply(ctx, modal, "Message edited successfully!")
                        .await;
                }
                Err(e) => {
                    error!("Error editing managed message: {e}");
                    self.edit_modal_reply(
                        ctx,
                        modal,
                        "An error occurred while editing the message. Please try again.",
                    )
                    .await;
                }
            }
        }
    }

    async fn edit_modal_reply(&self, ctx: &Context, modal: &ModalInteraction, text: &str) {
        let _ = modal
            .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
            .await;
    }
}

fn modal_input(modal: &ModalInteraction, custom_id: &str) -> Option<String> {
    for row in &modal.data.components {
        for component in &row.components {
            if let ActionRowComponent::InputText(input) = component
                && input.custom_id == custom_id
            {
                return input.value.clone();
            }
        }
    }
    None
}
