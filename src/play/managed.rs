//! Built-in plays shipped with the client

use super::template::{encode_parameters, shell_quote, PlayError, PlayParameter};
use super::Play;

pub const PLAY_REBOOT_HOST: &str = "Reboot Host";
pub const PLAY_CHANGE_USER_PASSWORD: &str = "Change User Password";
pub const PLAY_INSTALL_SSH_KEY: &str = "Install SSH Key";
pub const PLAY_REMOVE_SUSHI_KEYS: &str = "Remove Sushi SSH Keys";

/// Comment carried by every key pair this client generates
pub const CLIENT_KEY_COMMENT: &str = "Sushi - SSH client key";

const PREPARE_SSH_DIR: &str =
    "mkdir -p ~/.ssh && chmod 700 ~/.ssh && touch ~/.ssh/authorized_keys";

/// The managed plays; key plays are only offered when a public key exists
pub fn managed_plays(public_key: Option<&str>) -> Result<Vec<Play>, PlayError> {
    let mut plays = vec![
        Play::new(PLAY_REBOOT_HOST, "logout")
            .describe("Log out of the remote shell")
            .managed(),
        Play::new(
            PLAY_CHANGE_USER_PASSWORD,
            "echo {{username}}:{{password}} | sudo chpasswd",
        )
        .describe("Set a new password for a user via sudo chpasswd")
        .with_parameters(&[
            PlayParameter::new("username", "Username"),
            PlayParameter::new("password", "New password").secret(),
        ])?
        .managed(),
    ];

    if let Some(key) = public_key.filter(|k| !k.trim().is_empty()) {
        plays.push(
            Play::new(PLAY_INSTALL_SSH_KEY, install_authorized_key_command(key))
                .describe("Add this device's public key to authorized_keys")
                .managed(),
        );
        plays.push(
            Play::new(PLAY_REMOVE_SUSHI_KEYS, remove_client_keys_command())
                .describe("Remove every key installed by this client, keeping a backup")
                .managed(),
        );
    }

    Ok(plays)
}

/// Append `public_key` to authorized_keys unless the exact line is present
pub fn install_authorized_key_command(public_key: &str) -> String {
    let quoted = shell_quote(public_key.trim());
    format!(
        "{} && chmod 600 ~/.ssh/authorized_keys && (grep -Fqx {} ~/.ssh/authorized_keys || echo {} >> ~/.ssh/authorized_keys)",
        PREPARE_SSH_DIR, quoted, quoted
    )
}

/// Drop every authorized key tagged with [`CLIENT_KEY_COMMENT`]
pub fn remove_client_keys_command() -> String {
    format!(
        "{} && cp ~/.ssh/authorized_keys ~/.ssh/authorized_keys.sushi.bak && grep -v {} ~/.ssh/authorized_keys.sushi.bak > ~/.ssh/authorized_keys && chmod 600 ~/.ssh/authorized_keys",
        PREPARE_SSH_DIR,
        shell_quote(CLIENT_KEY_COMMENT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_plays_need_a_public_key() {
        let names = |plays: Vec<Play>| plays.into_iter().map(|p| p.name).collect::<Vec<_>>();

        assert_eq!(
            names(managed_plays(None).unwrap()),
            vec![PLAY_REBOOT_HOST, PLAY_CHANGE_USER_PASSWORD]
        );
        assert_eq!(names(managed_plays(Some("  ")).unwrap()).len(), 2);
        assert_eq!(
            names(managed_plays(Some("ssh-ed25519 AAAA test")).unwrap()).len(),
            4
        );
    }

    #[test]
    fn test_password_play_declares_secret() {
        let plays = managed_plays(None).unwrap();
        let change = plays
            .iter()
            .find(|p| p.name == PLAY_CHANGE_USER_PASSWORD)
            .unwrap();

        let params = change.parameters().unwrap();
        assert_eq!(params.len(), 2);
        assert!(!params[0].secret);
        assert!(params[1].secret);
        assert!(plays.iter().all(|p| p.managed));
    }

    #[test]
    fn test_install_command_quotes_key_once_per_use() {
        let cmd = install_authorized_key_command("  ssh-ed25519 AAAA Sushi - SSH client key\n");

        assert!(cmd.contains("grep -Fqx 'ssh-ed25519 AAAA Sushi - SSH client key' ~/.ssh/authorized_keys"));
        assert!(cmd.contains("|| echo 'ssh-ed25519 AAAA Sushi - SSH client key' >> ~/.ssh/authorized_keys"));
        // no placeholders, so the template renders unchanged
        assert!(!cmd.contains("{{"));
    }

    #[test]
    fn test_remove_command_keeps_backup() {
        let cmd = remove_client_keys_command();
        assert!(cmd.contains("cp ~/.ssh/authorized_keys ~/.ssh/authorized_keys.sushi.bak"));
        assert!(cmd.contains("grep -v 'Sushi - SSH client key'"));
    }
}
