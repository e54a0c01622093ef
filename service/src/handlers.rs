//! Channel state machine. One handler per chain event kind, dispatched
//! through a single `match` over [`Event`] rather than a lookup table.
//! Each handler fetches referenced entities, validates, mutates, and may
//! append to the scheduled-action batch; the event loop commits everything
//! for one block in a single `Storage::apply`.

use log::{error, info, warn};

use ms_common::ids::ChannelKey;
use ms_common::types::{Channel, ChannelState, OnChainUpdateStatus, ScheduledAction, ScheduledEvent};

use crate::chain::Event;
use crate::domain::BlockchainState;
use crate::storage::WriteOp;

/// Default fraction of `settle_timeout` after a close at which the MS fires
/// its `MONITOR` action, used when no override is configured. Must be
/// strictly less than 1 to leave slack for the monitor transaction to mine
/// before the settle window closes.
pub const MONITOR_WINDOW_RATIO: f64 = 0.8;

/// Offset added to `closing_block + settle_timeout` for the `CLAIM_REWARD`
/// trigger, giving the settlement transaction time to mine.
pub const CLAIM_REWARD_DELAY_BLOCKS: u64 = 5;

/// Everything a handler needs to look up existing entities. The event loop
/// supplies this per block; handlers never hold their own storage handle.
pub struct HandlerContext<'a> {
    pub our_address: ms_common::Address,
    pub latest_known_block: u64,
    pub existing_channel: Option<&'a Channel>,
    pub monitor_window_ratio: f64,
}

/// Outcome of dispatching one event: the mutated channel (if any) plus any
/// scheduled-event writes, folded into the block's `WriteOp` batch by the
/// event loop.
#[derive(Default)]
pub struct HandlerOutcome {
    pub channel: Option<Channel>,
    pub scheduled_events: Vec<ScheduledEvent>,
}

impl HandlerOutcome {
    fn with_channel(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            scheduled_events: Vec::new(),
        }
    }
}

/// Dispatches one decoded chain event. `ctx.existing_channel` must reflect
/// the current committed state for the event's channel, if any;
/// `UpdatedHeadBlock` carries no channel and is handled separately by
/// [`handle_updated_head_block`].
pub fn dispatch(event: &Event, ctx: &HandlerContext<'_>) -> HandlerOutcome {
    match event {
        Event::ChannelOpened {
            token_network_address,
            channel_identifier,
            participant1,
            participant2,
            settle_timeout,
            ..
        } => {
            info!(
                "received new channel token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
            HandlerOutcome::with_channel(Channel::new(
                *token_network_address,
                *channel_identifier,
                *participant1,
                *participant2,
                *settle_timeout,
            ))
        }

        Event::ChannelClosed {
            token_network_address,
            channel_identifier,
            closing_participant,
            block_number,
        } => handle_channel_closed(
            ctx,
            *token_network_address,
            *channel_identifier,
            *closing_participant,
            *block_number,
        ),

        Event::NonClosingBalanceProofUpdated {
            token_network_address,
            channel_identifier,
            closing_participant,
            nonce,
            ..
        } => handle_non_closing_update(
            ctx,
            *token_network_address,
            *channel_identifier,
            *closing_participant,
            *nonce,
        ),

        Event::ChannelSettled {
            token_network_address,
            channel_identifier,
            ..
        } => handle_channel_settled(ctx, *token_network_address, *channel_identifier),

        Event::MonitorNewBalanceProof {
            token_network_address,
            channel_identifier,
            nonce,
            ms_address,
            raiden_node_address,
            ..
        } => handle_monitor_new_balance_proof(
            ctx,
            *token_network_address,
            *channel_identifier,
            *nonce,
            *ms_address,
            *raiden_node_address,
        ),

        Event::MonitorRewardClaimed {
            ms_address,
            amount,
            reward_identifier,
            ..
        } => {
            info!(
                "received MSC RewardClaimed ms_address={:?} amount={} reward_identifier={:?}",
                ms_address, amount, reward_identifier
            );
            HandlerOutcome::default()
        }

        Event::UpdatedHeadBlock { .. } => HandlerOutcome::default(),
    }
}

/// `UpdatedHeadBlock` does not touch a channel; it advances the persisted
/// cursor directly. The cursor never regresses.
pub fn handle_updated_head_block(state: BlockchainState, head_block_number: u64) -> WriteOp {
    let mut state = state;
    state.latest_known_block = head_block_number;
    WriteOp::UpdateState(state)
}

fn handle_channel_closed(
    ctx: &HandlerContext<'_>,
    token_network_address: ms_common::Address,
    channel_identifier: ms_common::ChannelId,
    closing_participant: ms_common::Address,
    block_number: u64,
) -> HandlerOutcome {
    let channel = match ctx.existing_channel {
        Some(c) => c,
        None => {
            error!(
                "channel not in database token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
            return HandlerOutcome::default();
        }
    };

    let mut outcome = HandlerOutcome::default();

    let settle_period_end_block = block_number + channel.settle_timeout;
    if settle_period_end_block >= ctx.latest_known_block {
        if let Some(non_closing_participant) = channel.other_participant(closing_participant) {
            let client_update_period =
                (channel.settle_timeout as f64 * ctx.monitor_window_ratio).round() as u64;
            let trigger_block = block_number + client_update_period;

            info!(
                "channel closed, triggering monitoring check token_network={:?} identifier={} trigger_block={}",
                token_network_address, channel_identifier, trigger_block
            );

            outcome.scheduled_events.push(ScheduledEvent {
                trigger_block_number: trigger_block,
                action: ScheduledAction::Monitor {
                    channel: ChannelKey::new(token_network_address, channel_identifier),
                    non_closing_participant,
                },
            });
        }
    } else {
        warn!(
            "settle period timeout is in the past, skipping token_network={:?} identifier={} settle_period_end_block={} known_block={}",
            token_network_address, channel_identifier, settle_period_end_block, ctx.latest_known_block
        );
    }

    let mut channel = channel.clone();
    channel.state = ChannelState::Closed;
    channel.closing_block = Some(block_number);
    channel.closing_participant = Some(closing_participant);
    outcome.channel = Some(channel);
    outcome
}

fn handle_non_closing_update(
    ctx: &HandlerContext<'_>,
    token_network_address: ms_common::Address,
    channel_identifier: ms_common::ChannelId,
    closing_participant: ms_common::Address,
    nonce: u64,
) -> HandlerOutcome {
    let channel = match ctx.existing_channel {
        Some(c) => c,
        None => {
            error!(
                "channel not in database token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
            return HandlerOutcome::default();
        }
    };

    let non_closing_participant = match channel.other_participant(closing_participant) {
        Some(p) => p,
        None => {
            error!(
                "update event contains invalid closing participant participant1={:?} participant2={:?} closing_participant={:?}",
                channel.participant1, channel.participant2, closing_participant
            );
            return HandlerOutcome::default();
        }
    };

    let mut channel = channel.clone();
    match &channel.update_status {
        None => {
            info!(
                "creating channel update state token_network={:?} identifier={} new_nonce={}",
                token_network_address, channel_identifier, nonce
            );
            channel.update_status = Some(OnChainUpdateStatus {
                update_sender_address: non_closing_participant,
                nonce,
            });
        }
        Some(status) => {
            // Strict `<=` rejection, in contrast to the `<` used by the
            // monitor-event handler below, which tolerates an equal nonce.
            if nonce <= status.nonce {
                error!(
                    "updateNonClosingBalanceProof nonce smaller than the known one, ignoring known_nonce={} received_nonce={}",
                    status.nonce, nonce
                );
                return HandlerOutcome::default();
            }
            info!(
                "updating channel update state token_network={:?} identifier={} new_nonce={}",
                token_network_address, channel_identifier, nonce
            );
            channel.update_status = Some(OnChainUpdateStatus {
                update_sender_address: non_closing_participant,
                nonce,
            });
        }
    }

    HandlerOutcome::with_channel(channel)
}

fn handle_channel_settled(
    ctx: &HandlerContext<'_>,
    token_network_address: ms_common::Address,
    channel_identifier: ms_common::ChannelId,
) -> HandlerOutcome {
    let channel = match ctx.existing_channel {
        Some(c) => c,
        None => {
            error!(
                "channel not in database token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
            return HandlerOutcome::default();
        }
    };

    info!(
        "received settle event for channel token_network={:?} identifier={}",
        token_network_address, channel_identifier
    );

    let mut channel = channel.clone();
    channel.state = ChannelState::Settled;
    HandlerOutcome::with_channel(channel)
}

fn handle_monitor_new_balance_proof(
    ctx: &HandlerContext<'_>,
    token_network_address: ms_common::Address,
    channel_identifier: ms_common::ChannelId,
    nonce: u64,
    ms_address: ms_common::Address,
    raiden_node_address: ms_common::Address,
) -> HandlerOutcome {
    let channel = match ctx.existing_channel {
        Some(c) => c,
        None => {
            error!(
                "channel not in database token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
            return HandlerOutcome::default();
        }
    };

    info!(
        "received MSC NewBalanceProof event token_network={:?} identifier={}",
        token_network_address, channel_identifier
    );

    let mut channel = channel.clone();
    match &channel.update_status {
        None => {
            info!(
                "creating channel update state token_network={:?} identifier={} new_nonce={} new_sender={:?}",
                token_network_address, channel_identifier, nonce, ms_address
            );
            channel.update_status = Some(OnChainUpdateStatus {
                update_sender_address: ms_address,
                nonce,
            });
        }
        Some(status) => {
            // `<` rather than `<=`: an equal nonce is tolerated because the
            // event may be the MS's own submission mirrored back.
            if nonce < status.nonce {
                error!(
                    "MSC NewBalanceProof nonce smaller than the known one, ignoring known_nonce={} received_nonce={}",
                    status.nonce, nonce
                );
                return HandlerOutcome::default();
            }
            info!(
                "updating channel update state token_network={:?} identifier={} new_nonce={} new_sender={:?}",
                token_network_address, channel_identifier, nonce, ms_address
            );
            channel.update_status = Some(OnChainUpdateStatus {
                update_sender_address: ms_address,
                nonce,
            });
        }
    }

    let mut outcome = HandlerOutcome::default();

    if ms_address == ctx.our_address {
        if let Some(closing_block) = channel.closing_block {
            let trigger_block = closing_block + channel.settle_timeout + CLAIM_REWARD_DELAY_BLOCKS;
            outcome.scheduled_events.push(ScheduledEvent {
                trigger_block_number: trigger_block,
                action: ScheduledAction::ClaimReward {
                    channel: ChannelKey::new(token_network_address, channel_identifier),
                    non_closing_participant: raiden_node_address,
                },
            });
        } else {
            error!(
                "NewBalanceProof for our own submission but closing_block unset token_network={:?} identifier={}",
                token_network_address, channel_identifier
            );
        }
    }

    outcome.channel = Some(channel);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_common::types::ChannelState;
    use ms_common::ChannelId;

    fn addr(b: u8) -> ms_common::Address {
        ms_common::Address::from([b; 20])
    }

    fn opened_channel() -> Channel {
        Channel::new(addr(1), ChannelId::from(1u64), addr(2), addr(3), 20)
    }

    #[test]
    fn channel_closed_schedules_monitor_at_window_ratio() {
        let channel = opened_channel();
        let ctx = HandlerContext {
            our_address: addr(9),
            latest_known_block: 120,
            existing_channel: Some(&channel),
            monitor_window_ratio: MONITOR_WINDOW_RATIO,
        };
        let outcome = handle_channel_closed(&ctx, addr(1), ChannelId::from(1u64), addr(2), 100);

        assert_eq!(outcome.scheduled_events.len(), 1);
        let se = outcome.scheduled_events[0];
        assert_eq!(se.trigger_block_number, 100 + 16);
        assert_eq!(se.action.non_closing_participant(), addr(3));
        assert_eq!(outcome.channel.unwrap().state, ChannelState::Closed);
    }

    #[test]
    fn channel_closed_skips_scheduling_when_settle_period_already_passed() {
        let channel = opened_channel();
        let ctx = HandlerContext {
            our_address: addr(9),
            latest_known_block: 200,
            existing_channel: Some(&channel),
            monitor_window_ratio: MONITOR_WINDOW_RATIO,
        };
        let outcome = handle_channel_closed(&ctx, addr(1), ChannelId::from(1u64), addr(2), 100);

        assert!(outcome.scheduled_events.is_empty());
        assert_eq!(outcome.channel.unwrap().state, ChannelState::Closed);
    }

    #[test]
    fn non_closing_update_rejects_equal_nonce() {
        let mut channel = opened_channel();
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(3),
            nonce: 5,
        });
        let ctx = HandlerContext {
            our_address: addr(9),
            latest_known_block: 120,
            existing_channel: Some(&channel),
            monitor_window_ratio: MONITOR_WINDOW_RATIO,
        };
        let outcome = handle_non_closing_update(&ctx, addr(1), ChannelId::from(1u64), addr(2), 5);
        assert!(outcome.channel.is_none());
    }

    #[test]
    fn monitor_new_balance_proof_tolerates_equal_nonce() {
        let mut channel = opened_channel();
        channel.closing_block = Some(100);
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(9),
            nonce: 5,
        });
        let ctx = HandlerContext {
            our_address: addr(9),
            latest_known_block: 120,
            existing_channel: Some(&channel),
            monitor_window_ratio: MONITOR_WINDOW_RATIO,
        };
        let outcome =
            handle_monitor_new_balance_proof(&ctx, addr(1), ChannelId::from(1u64), 5, addr(9), addr(3));
        assert!(outcome.channel.is_some());
        assert_eq!(outcome.scheduled_events.len(), 1);
        assert_eq!(outcome.scheduled_events[0].trigger_block_number, 100 + 20 + 5);
    }

    #[test]
    fn monitor_new_balance_proof_from_other_ms_does_not_schedule_claim() {
        let mut channel = opened_channel();
        channel.closing_block = Some(100);
        let ctx = HandlerContext {
            our_address: addr(9),
            latest_known_block: 120,
            existing_channel: Some(&channel),
            monitor_window_ratio: MONITOR_WINDOW_RATIO,
        };
        let outcome =
            handle_monitor_new_balance_proof(&ctx, addr(1), ChannelId::from(1u64), 8, addr(50), addr(3));
        assert!(outcome.scheduled_events.is_empty());
    }
}
