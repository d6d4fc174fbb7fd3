use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// Custom ids of the player buttons.
pub mod button_ids {
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const LOOP: &str = "music_loop";
    pub const QUEUE: &str = "music_queue";
}

/// What a player button asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Skip,
    Stop,
    Loop,
    Queue,
}

impl ButtonAction {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            button_ids::SKIP => Some(Self::Skip),
            button_ids::STOP => Some(Self::Stop),
            button_ids::LOOP => Some(Self::Loop),
            button_ids::QUEUE => Some(Self::Queue),
            _ => None,
        }
    }
}

/// Controls attached to the now-playing message.
pub fn create_player_buttons(looping: bool) -> Vec<CreateActionRow> {
    let loop_style = if looping {
        ButtonStyle::Success
    } else {
        ButtonStyle::Secondary
    };

    vec![CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::SKIP)
            .label("Skip")
            .emoji('⏭')
            .style(ButtonStyle::Primary),
        CreateButton::new(button_ids::STOP)
            .label("Stop")
            .emoji('⏹')
            .style(ButtonStyle::Danger),
        CreateButton::new(button_ids::LOOP)
            .label("Loop")
            .emoji('🔁')
            .style(loop_style),
        CreateButton::new(button_ids::QUEUE)
            .label("Queue")
            .emoji('📄')
            .style(ButtonStyle::Secondary),
    ])]
}
