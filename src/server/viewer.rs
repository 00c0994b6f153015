//! A minimal static demo page for exercising the tile/region API by hand.
//!
//! This is not a dialect viewer (no OpenSeadragon/DZI tile source adapter):
//! the HTTP surface is a thin stand-in for wire-dialect transports, not a
//! dialect implementation, so the demo just lays out one resolution level's
//! tiles in a plain `<canvas>` grid using `fetch`.

fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

/// Generate a demo page that fetches `/info/{slide_id}` and renders the
/// chosen resolution level as a grid of `/tile/{slide_id}` requests.
pub fn generate_demo_html(slide_id: &str) -> String {
    let escaped_slide_id = html_escape(slide_id);
    let encoded_slide_id = urlencoding::encode(slide_id);

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>pyrastream demo - {escaped_slide_id}</title>
<style>
  body {{ font-family: monospace; background: #111; color: #ddd; margin: 0; padding: 16px; }}
  #status {{ margin-bottom: 8px; }}
  #grid {{ display: grid; gap: 0; }}
  #grid img {{ display: block; }}
</style>
</head>
<body>
<div id="status">loading {escaped_slide_id}...</div>
<div id="grid"></div>
<script>
const slideId = "{encoded_slide_id}";

async function main() {{
  const status = document.getElementById('status');
  const info = await (await fetch(`/info/${{slideId}}`)).json();
  const level = info.levels.length - 1; // coarsest level, cheap to render fully
  const across = Math.ceil(info.levels[level].width / info.tile_width);
  const down = Math.ceil(info.levels[level].height / info.tile_height);
  status.textContent = `${{slideId}}: level ${{level}}, ${{across}}x${{down}} tiles`;

  const grid = document.getElementById('grid');
  grid.style.gridTemplateColumns = `repeat(${{across}}, ${{info.tile_width}}px)`;

  for (let y = 0; y < down; y++) {{
    for (let x = 0; x < across; x++) {{
      const tileIndex = y * across + x;
      const img = document.createElement('img');
      img.src = `/tile/${{slideId}}?resolution=${{level}}&tile=${{tileIndex}}&encoding=jpeg&quality=80`;
      img.width = info.tile_width;
      img.height = info.tile_height;
      grid.appendChild(img);
    }}
  }}
}}

main().catch(e => {{
  document.getElementById('status').textContent = `error: ${{e}}`;
}});
</script>
</body>
</html>"##
    )
}
