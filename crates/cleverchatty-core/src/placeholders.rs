//! `{AGENT_ID}` / `{CLIENT_AGENT_ID}` template expansion.
//!
//! Applied to system instructions and to templated config values (env,
//! headers, stdio args, A2A metadata) at use time, so per-session client
//! ids resolve correctly.

pub const AGENT_ID: &str = "{AGENT_ID}";
pub const CLIENT_AGENT_ID: &str = "{CLIENT_AGENT_ID}";

/// Replace both placeholders. An absent client agent id expands to "".
pub fn expand(value: &str, agent_id: &str, client_agent_id: Option<&str>) -> String {
    value
        .replace(AGENT_ID, agent_id)
        .replace(CLIENT_AGENT_ID, client_agent_id.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_both_placeholders() {
        let out = expand(
            "You are {AGENT_ID} talking to {CLIENT_AGENT_ID}.",
            "helper",
            Some("caller-1"),
        );
        assert_eq!(out, "You are helper talking to caller-1.");
    }

    #[test]
    fn missing_client_id_becomes_empty() {
        let out = expand("client={CLIENT_AGENT_ID}", "helper", None);
        assert_eq!(out, "client=");
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(expand("no templates", "a", None), "no templates");
    }
}
