/// Transport-independent view of what a request carried: the correlation cookie, the access
/// token cookie and the best-effort client address.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub sid: Option<String>,
    pub access_token: Option<String>,
    pub remote_ip: Option<String>,
}

impl RequestContext {
    pub fn new(sid: Option<String>, access_token: Option<String>, remote_ip: Option<String>) -> Self {
        Self { sid: non_blank(sid), access_token: non_blank(access_token), remote_ip: non_blank(remote_ip) }
    }

    pub fn anonymous() -> Self { Self::default() }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self { self.sid = non_blank(Some(sid.into())); self }
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self { self.access_token = non_blank(Some(token.into())); self }
    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self { self.remote_ip = non_blank(Some(ip.into())); self }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
