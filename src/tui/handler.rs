use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    MoveUp,
    MoveDown,
    NextFeed,
    OpenDigest,
    MarkRead,
    OpenInBrowser,
    Play,
    Refresh,
    ShowHelp,
    HideHelp,
}

pub fn handle_key_event(key: KeyEvent, show_help: bool) -> Option<AppAction> {
    // If help is showing, any key closes it
    if show_help {
        return Some(AppAction::HideHelp);
    }

    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), _) => Some(AppAction::Quit),
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(AppAction::Quit),

        (KeyCode::Char('j'), _) | (KeyCode::Down, _) => Some(AppAction::MoveDown),
        (KeyCode::Char('k'), _) | (KeyCode::Up, _) => Some(AppAction::MoveUp),
        (KeyCode::Char('f'), _) | (KeyCode::Tab, _) => Some(AppAction::NextFeed),

        (KeyCode::Enter, _) => Some(AppAction::OpenDigest),
        (KeyCode::Char('m'), _) => Some(AppAction::MarkRead),
        (KeyCode::Char('o'), _) => Some(AppAction::OpenInBrowser),
        (KeyCode::Char('p'), _) => Some(AppAction::Play),
        (KeyCode::Char('r'), _) => Some(AppAction::Refresh),

        (KeyCode::Char('?'), _) => Some(AppAction::ShowHelp),

        _ => None,
    }
}
