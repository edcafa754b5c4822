use llmgate_protocol::{CanonicalMessage, Role};

/// If the target model can't take a `system` role, every system message is
/// rewritten to `user`, preserving whatever shape its content already has
/// (§4.B "System-role stripping").
pub fn strip_system_role(messages: &[CanonicalMessage], supports_system_role: bool) -> Vec<CanonicalMessage> {
    if supports_system_role {
        return messages.to_vec();
    }
    messages
        .iter()
        .cloned()
        .map(|mut message| {
            if message.role == Role::System {
                message.role = Role::User;
            }
            message
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_system_to_user_when_unsupported() {
        let messages = vec![CanonicalMessage::system("be terse"), CanonicalMessage::user("hi")];
        let out = strip_system_role(&messages, false);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[1].role, Role::User);
    }

    #[test]
    fn leaves_system_role_alone_when_supported() {
        let messages = vec![CanonicalMessage::system("be terse")];
        let out = strip_system_role(&messages, true);
        assert_eq!(out[0].role, Role::System);
    }
}
