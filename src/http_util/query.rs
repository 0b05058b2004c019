use url::form_urlencoded;

pub fn parse(query: Option<&str>) -> Vec<(String, String)> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

/// Builds `?a=1&b=2`, skipping empty values. Repeat a key to send an array.
pub fn build<'a, I, V>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut empty = true;
    for (key, value) in params {
        let value = value.as_ref();
        if value.is_empty() {
            continue;
        }
        serializer.append_pair(key, value);
        empty = false;
    }
    if empty {
        String::new()
    } else {
        format!("?{}", serializer.finish())
    }
}
