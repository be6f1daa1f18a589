/// Builds the Overpass query for kebab places.
///
/// When `area` is given, the scope is the administrative boundary with that
/// exact name; otherwise it's anything named `city`.
/// Values are inserted as-is, they come from the environment and are trusted.
pub fn build_query(city: &str, area: Option<&str>) -> String {
    let scope = match area.filter(|a| !a.is_empty()) {
        Some(area) => format!(r#"area["name"="{area}"]["boundary"="administrative"]->.a;"#),
        None => format!(r#"area["name"="{city}"]->.a;"#),
    };

    format!(
        r#"[out:json][timeout:60];
{scope}
(
  node["cuisine"="kebab"](area.a);
  way["cuisine"="kebab"](area.a);
  relation["cuisine"="kebab"](area.a);

  node["name"~"kebab", i](area.a);
  way["name"~"kebab", i](area.a);
  relation["name"~"kebab", i](area.a);
);
out center tags;
"#
    )
}
