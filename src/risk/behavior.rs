use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

/// Closed vocabulary of user actions the risk provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorType {
    Login,
    Signup,
    PasswordReset,
    Pageview,
    AddToCart,
    Giveaway,
    Purchase,
    ContactForm,
    AccountUpdate,
    UserPost,
    UserComment,
    PostInteraction,
    Other,
    UsernameRecovery,
    EmailVerify,
    PhoneVerify,
    OtherVerify,
    UserLogout,
    ForcedLogout,
    SessionTimeout,
    SessionEndOther,
    AccountLinking,
}

impl BehaviorType {
    pub const ALL: [BehaviorType; 22] = [
        BehaviorType::Login,
        BehaviorType::Signup,
        BehaviorType::PasswordReset,
        BehaviorType::Pageview,
        BehaviorType::AddToCart,
        BehaviorType::Giveaway,
        BehaviorType::Purchase,
        BehaviorType::ContactForm,
        BehaviorType::AccountUpdate,
        BehaviorType::UserPost,
        BehaviorType::UserComment,
        BehaviorType::PostInteraction,
        BehaviorType::Other,
        BehaviorType::UsernameRecovery,
        BehaviorType::EmailVerify,
        BehaviorType::PhoneVerify,
        BehaviorType::OtherVerify,
        BehaviorType::UserLogout,
        BehaviorType::ForcedLogout,
        BehaviorType::SessionTimeout,
        BehaviorType::SessionEndOther,
        BehaviorType::AccountLinking,
    ];

    /// Wire label (case-sensitive on the provider side).
    pub fn as_wire(self) -> &'static str {
        match self {
            BehaviorType::Login => "login",
            BehaviorType::Signup => "signup",
            BehaviorType::PasswordReset => "password_reset",
            BehaviorType::Pageview => "pageview",
            BehaviorType::AddToCart => "add_to_cart",
            BehaviorType::Giveaway => "giveaway",
            BehaviorType::Purchase => "purchase",
            BehaviorType::ContactForm => "contact_form",
            BehaviorType::AccountUpdate => "account_update",
            BehaviorType::UserPost => "user_post",
            BehaviorType::UserComment => "user_comment",
            BehaviorType::PostInteraction => "post_interaction",
            BehaviorType::Other => "other",
            BehaviorType::UsernameRecovery => "username_recovery",
            BehaviorType::EmailVerify => "email_verify",
            BehaviorType::PhoneVerify => "phone_verify",
            BehaviorType::OtherVerify => "other_verify",
            BehaviorType::UserLogout => "user_logout",
            BehaviorType::ForcedLogout => "forced_logout",
            BehaviorType::SessionTimeout => "session_timeout",
            BehaviorType::SessionEndOther => "session_end_other",
            BehaviorType::AccountLinking => "account_linking",
        }
    }

    /// Behaviors that carry a transaction payload in `event_data`.
    pub fn is_commerce(self) -> bool { matches!(self, BehaviorType::AddToCart | BehaviorType::Purchase) }
}

impl fmt::Display for BehaviorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_wire()) }
}

impl FromStr for BehaviorType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        BehaviorType::ALL.iter().copied().find(|b| b.as_wire() == t).ok_or_else(|| anyhow!("unknown behavior type '{}'", s))
    }
}
