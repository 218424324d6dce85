//! UI components
//!
//! Contains callback tags, texts and keyboard layouts. Every function here is
//! pure: the same input always yields the same [`Screen`].

use super::gateway::{Action, Screen};
use crate::config::MenuLinks;
use crate::storage::RegistryEntry;
use html_escape::encode_text;

// ─────────────────────────────────────────────────────────────────────────────
// Callback constants
// ─────────────────────────────────────────────────────────────────────────────

/// Callback data for opening the score list
pub const CALLBACK_OPEN_REGISTRY: &str = "open-registry";
/// Callback data for retrying the last failed link
pub const CALLBACK_RETRY_VALIDATION: &str = "retry-validation";
/// Callback data for returning to the main menu
pub const CALLBACK_NAVIGATE_BACK: &str = "navigate-back";
/// Prefix of deletion callbacks, followed by the score name
pub const CALLBACK_DELETE_PREFIX: &str = "delete-entry:";

/// Telegram rejects callback data longer than this many bytes
pub const CALLBACK_DATA_LIMIT: usize = 64;

/// Entries per row in the score list
const REGISTRY_COLUMNS: usize = 2;

/// Parsed callback tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Show the score list
    OpenRegistry,
    /// Retry the pending link
    RetryValidation,
    /// Back to the main menu
    NavigateBack,
    /// Delete the entry referenced by the payload
    DeleteEntry(String),
    /// Anything else
    Unknown(String),
}

impl CallbackAction {
    /// Parse raw callback data
    ///
    /// # Examples
    ///
    /// ```
    /// use scoredesk::bot::views::CallbackAction;
    /// assert_eq!(CallbackAction::parse("open-registry"), CallbackAction::OpenRegistry);
    /// assert_eq!(
    ///     CallbackAction::parse("delete-entry:Aida"),
    ///     CallbackAction::DeleteEntry("Aida".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn parse(data: &str) -> Self {
        match data {
            CALLBACK_OPEN_REGISTRY => Self::OpenRegistry,
            CALLBACK_RETRY_VALIDATION => Self::RetryValidation,
            CALLBACK_NAVIGATE_BACK => Self::NavigateBack,
            _ => data
                .strip_prefix(CALLBACK_DELETE_PREFIX)
                .map_or_else(|| Self::Unknown(data.to_string()), |p| Self::DeleteEntry(p.to_string())),
        }
    }
}

/// Callback data for deleting `name`, shown at position `index`.
///
/// Falls back to `#<index>` when the name does not fit Telegram's limit.
#[must_use]
pub fn delete_callback_data(name: &str, index: usize) -> String {
    let data = format!("{CALLBACK_DELETE_PREFIX}{name}");
    if data.len() <= CALLBACK_DATA_LIMIT && !name.starts_with('#') {
        data
    } else {
        format!("{CALLBACK_DELETE_PREFIX}#{index}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Texts
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt shown when a flow starts
pub const ENTER_PASSWORD: &str = "Введите пароль:";
/// Prompt after the password was accepted in the add flow
pub const SEND_SHEET_LINK: &str = "Отправьте ссылку на Google таблицу:";
/// Reply to a wrong password
pub const WRONG_PASSWORD: &str = "❌ Пароль неверный.";

// ─────────────────────────────────────────────────────────────────────────────
// Screens
// ─────────────────────────────────────────────────────────────────────────────

fn back_row() -> Vec<Action> {
    vec![Action::callback("⬅ [Назад]", CALLBACK_NAVIGATE_BACK)]
}

/// Top-level menu
#[must_use]
pub fn main_menu(links: &MenuLinks) -> Screen {
    Screen::with_keyboard(
        "Выберите действие:",
        vec![
            vec![Action::link("📅 Расписание", &links.schedule)],
            vec![Action::link("📁 Qlab проекты", &links.qlab)],
            vec![Action::link("🎛 X32 сцены", &links.x32)],
            vec![Action::callback("🎼 Партитуры", CALLBACK_OPEN_REGISTRY)],
        ],
    )
}

/// Score list, two link buttons per row, followed by a back button
#[must_use]
pub fn registry_menu(entries: &[RegistryEntry]) -> Screen {
    if entries.is_empty() {
        return Screen::with_keyboard(
            "Партитур пока нет.\nДобавьте через /addtab",
            vec![back_row()],
        );
    }

    let mut rows: Vec<Vec<Action>> = entries
        .chunks(REGISTRY_COLUMNS)
        .map(|chunk| {
            chunk
                .iter()
                .map(|entry| Action::link(&entry.name, &entry.url))
                .collect()
        })
        .collect();
    rows.push(back_row());
    Screen::with_keyboard("🎼 Партитуры:", rows)
}

/// Deletion menu, one button per entry
#[must_use]
pub fn deletion_menu(entries: &[RegistryEntry]) -> Screen {
    if entries.is_empty() {
        return Screen::text("Партитур пока нет.\nДобавьте через /addtab");
    }

    let rows = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            vec![Action::callback(
                &entry.name,
                delete_callback_data(&entry.name, index),
            )]
        })
        .collect();
    Screen::with_keyboard("Выберите таблицу для удаления:", rows)
}

/// Confirmation after a score was added
#[must_use]
pub fn entry_added(name: &str) -> Screen {
    Screen::text(format!("✅ Партитура «{}» добавлена", encode_text(name)))
}

/// Confirmation after a score was deleted
#[must_use]
pub fn entry_deleted(name: &str) -> Screen {
    Screen::text(format!("🗑 «{}» удалена", encode_text(name)))
}

/// Remediation message for a link that could not be opened, with a retry button
#[must_use]
pub fn validation_failed(service_account_email: &str) -> Screen {
    let text = format!(
        "❌ Не удалось открыть таблицу.\n\
         Проверьте ссылку и убедитесь, что сервисный аккаунт имеет доступ на чтение.\n\
         Чтобы разрешить доступ:\n\
         1️⃣ Откройте Google таблицу.\n\
         2️⃣ Нажмите 'Поделиться' → 'Добавить людей и группы'.\n\
         3️⃣ Введите email сервисного аккаунта:\n\
         \u{20}  <code>{}</code>\n\
         4️⃣ Выберите доступ 'Чтение' и сохраните.\n\
         После этого нажмите кнопку ниже, чтобы попробовать снова:",
        encode_text(service_account_email)
    );
    Screen::with_keyboard(
        text,
        vec![vec![Action::callback(
            "🔄 Попробовать снова",
            CALLBACK_RETRY_VALIDATION,
        )]],
    )
}

/// Plain reply without buttons
#[must_use]
pub fn notice(text: &str) -> Screen {
    Screen::text(text)
}
