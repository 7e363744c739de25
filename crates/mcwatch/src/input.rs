use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

pub enum InputCommand {
    Quit,
    Redraw,
    ScrollUp,
    ScrollDown,
}

pub fn handle_input(key: KeyEvent) -> Option<InputCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => Some(InputCommand::Quit),
        KeyCode::Char('l') if ctrl => Some(InputCommand::Redraw),
        KeyCode::Char('q') | KeyCode::Esc => Some(InputCommand::Quit),
        KeyCode::PageUp => Some(InputCommand::ScrollUp),
        KeyCode::PageDown => Some(InputCommand::ScrollDown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> Option<InputCommand> {
        handle_input(KeyEvent::new(code, modifiers))
    }

    #[test]
    fn quit_keys() {
        assert!(matches!(press(KeyCode::Char('q'), KeyModifiers::NONE), Some(InputCommand::Quit)));
        assert!(matches!(press(KeyCode::Esc, KeyModifiers::NONE), Some(InputCommand::Quit)));
        assert!(matches!(
            press(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(InputCommand::Quit)
        ));
        assert!(press(KeyCode::Char('c'), KeyModifiers::NONE).is_none());
    }

    #[test]
    fn redraw_and_scroll() {
        assert!(matches!(
            press(KeyCode::Char('l'), KeyModifiers::CONTROL),
            Some(InputCommand::Redraw)
        ));
        assert!(matches!(press(KeyCode::PageUp, KeyModifiers::NONE), Some(InputCommand::ScrollUp)));
        assert!(matches!(
            press(KeyCode::PageDown, KeyModifiers::NONE),
            Some(InputCommand::ScrollDown)
        ));
    }

    #[test]
    fn key_release_is_ignored() {
        let mut key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert!(handle_input(key).is_none());
    }
}
