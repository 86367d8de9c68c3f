use crate::models::{Playlist, Tag, Track};
use crate::services::xtream::{XtreamClient, XtreamError};

/// Upstream URI of a live stream as the panel serves it.
///
/// With an output extension the path gets the `live/` prefix the panel expects.
pub fn live_stream_uri(base_url: &str, user: &str, password: &str, stream_id: &str, output: &str) -> String {
    if output.is_empty() {
        format!("{}/{}/{}/{}", base_url, user, password, stream_id)
    } else {
        format!("{}/live/{}/{}/{}.{}", base_url, user, password, stream_id, output)
    }
}

/// Build a live-TV playlist from the panel's categories and streams.
///
/// Categories and streams keep the panel's order.
pub async fn generate_live_playlist(
    client: &XtreamClient,
    base_url: &str,
    user: &str,
    password: &str,
    output: &str,
) -> Result<Playlist, XtreamError> {
    let categories = client.live_categories().await?;
    let mut tracks = Vec::new();

    for category in &categories {
        let streams = client.live_streams(&category.category_id).await?;

        for stream in streams {
            let mut tags = Vec::with_capacity(4);
            if let Some(epg) = &stream.epg_channel_id {
                tags.push(Tag::new("tvg-id", epg.clone()));
            }
            if !stream.name.is_empty() {
                tags.push(Tag::new("tvg-name", stream.name.clone()));
            }
            if let Some(icon) = &stream.stream_icon {
                tags.push(Tag::new("tvg-logo", icon.clone()));
            }
            if !category.category_name.is_empty() {
                tags.push(Tag::new("group-title", category.category_name.clone()));
            }

            tracks.push(Track {
                name: stream.name,
                length: -1,
                uri: live_stream_uri(base_url, user, password, &stream.stream_id, output),
                tags,
            });
        }
    }

    tracing::info!(
        categories = categories.len(),
        tracks = tracks.len(),
        "generated playlist from Xtream API"
    );
    Ok(Playlist::new(tracks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_live_stream_uri() {
        assert_eq!(
            live_stream_uri("http://panel.example", "xu", "xp", "42", "ts"),
            "http://panel.example/live/xu/xp/42.ts"
        );
        assert_eq!(
            live_stream_uri("http://panel.example", "xu", "xp", "42", ""),
            "http://panel.example/xu/xp/42"
        );
    }

    #[tokio::test]
    async fn test_generate_live_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "get_live_categories"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"category_id":"1","category_name":"News"},{"category_id":"2","category_name":"Sports"}]"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "get_live_streams"))
            .and(query_param("category_id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"name":"BBC","stream_id":42,"stream_icon":"http://img/bbc.png","epg_channel_id":"bbc.uk"}]"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "get_live_streams"))
            .and(query_param("category_id", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"name":"Sky","stream_id":"7","stream_icon":"","epg_channel_id":null}]"#,
            ))
            .mount(&server)
            .await;

        let client = XtreamClient::new(Client::new(), &server.uri(), "xu".into(), "xp".into());
        let playlist = generate_live_playlist(&client, &server.uri(), "xu", "xp", "ts")
            .await
            .unwrap();

        assert_eq!(playlist.len(), 2);
        let bbc = &playlist.tracks[0];
        assert_eq!(bbc.uri, format!("{}/live/xu/xp/42.ts", server.uri()));
        assert_eq!(
            bbc.tags,
            vec![
                Tag::new("tvg-id", "bbc.uk"),
                Tag::new("tvg-name", "BBC"),
                Tag::new("tvg-logo", "http://img/bbc.png"),
                Tag::new("group-title", "News"),
            ]
        );
        let sky = &playlist.tracks[1];
        assert_eq!(sky.tags, vec![Tag::new("tvg-name", "Sky"), Tag::new("group-title", "Sports")]);
    }
}
