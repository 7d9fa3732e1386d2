//! Request metadata attached to every call.

use url::form_urlencoded;

pub const USER_AGENT: &str = "user-agent";
pub const API_CLIENT: &str = "x-rowstream-api-client";
pub const REQUEST_PARAMS: &str = "x-rowstream-request-params";

fn client_version() -> String {
    format!("rowstream-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Headers for a call on `resource`.
///
/// `resource_key` is `table_name` for row reads and `name` for queries. The
/// `app_profile_id` parameter is always present, empty when unset.
pub(crate) fn call_metadata(
    resource_key: &str,
    resource: &str,
    app_profile_id: &str,
) -> Vec<(String, String)> {
    let params = form_urlencoded::Serializer::new(String::new())
        .append_pair(resource_key, resource)
        .append_pair("app_profile_id", app_profile_id)
        .finish();

    vec![
        (USER_AGENT.to_string(), client_version()),
        (
            API_CLIENT.to_string(),
            format!("{} rust/{}", client_version(), env!("CARGO_PKG_RUST_VERSION")),
        ),
        (REQUEST_PARAMS.to_string(), params),
    ]
}
