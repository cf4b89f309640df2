//! Client authentication state as a pure reducer.

use crate::db::PublicUser;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAuthState {
    pub authenticated: bool,
    pub loading: bool,
    pub user: Option<PublicUser>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// A login or registration request went out
    Start,
    Succeeded(PublicUser),
    Failure(String),
    Logout,
    /// Result of a session check; `None` means not authenticated
    CheckAuthStatus(Option<PublicUser>),
}

/// Next state for `action`. Never mutates `state`.
pub fn reduce(state: &ClientAuthState, action: AuthAction) -> ClientAuthState {
    match action {
        AuthAction::Start => ClientAuthState {
            loading: true,
            error: None,
            ..state.clone()
        },
        AuthAction::Succeeded(user) => ClientAuthState {
            authenticated: true,
            loading: false,
            user: Some(user),
            error: None,
        },
        AuthAction::Failure(message) => ClientAuthState {
            authenticated: false,
            loading: false,
            user: None,
            error: Some(message),
        },
        AuthAction::Logout => ClientAuthState::default(),
        AuthAction::CheckAuthStatus(user) => ClientAuthState {
            authenticated: user.is_some(),
            loading: false,
            user,
            error: None,
        },
    }
}
