use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

use super::domain::{ChannelRef, CommunityId};

/// Channels that receive the debounced projections. A missing channel disables that projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionChannels {
    pub dashboard: Option<ChannelRef>,
    pub interviewer_stats: Option<ChannelRef>,
    pub monthly_summary: Option<ChannelRef>,
}

/// Local hours during which interviewers are pinged about new profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeWindow {
    pub opens_at_hour: u32,
    pub closes_at_hour: u32,
}

impl Default for NoticeWindow {
    fn default() -> Self {
        Self {
            opens_at_hour: 7,
            closes_at_hour: 23,
        }
    }
}

impl NoticeWindow {
    pub fn contains(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        let hour = now.with_timezone(&offset).hour();
        hour >= self.opens_at_hour && hour < self.closes_at_hour
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub primary_community: CommunityId,
    pub utc_offset: FixedOffset,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub monthly_goal: u32,
    pub channels: ProjectionChannels,
    pub notice_channel: Option<ChannelRef>,
    pub audit_channel: Option<ChannelRef>,
    pub notice_window: NoticeWindow,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            primary_community: CommunityId(0),
            utc_offset: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
            poll_interval: Duration::from_secs(30),
            debounce: Duration::from_secs(2),
            monthly_goal: 10,
            channels: ProjectionChannels::default(),
            notice_channel: None,
            audit_channel: None,
            notice_window: NoticeWindow::default(),
        }
    }
}
