pub(super) const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>object tally</title>
</head>
<body>
<h1>object tally</h1>
<p id="message"></p>
<img id="frame" alt="latest frame" width="640">
<table id="counts"></table>
<p>
  <button onclick="post('/control/start')">Start</button>
  <button onclick="post('/control/stop')">Stop</button>
</p>
<p>
  confidence <input id="confidence" type="range" min="0" max="1" step="0.01">
  overlap <input id="overlap" type="range" min="0" max="1" step="0.01">
  agnostic <input id="agnostic" type="checkbox">
  <button onclick="apply()">Apply</button>
</p>
<script>
function post(path) { return fetch(path, { method: 'POST' }).then(refresh); }
function apply() {
  const q = new URLSearchParams({
    confidence: document.getElementById('confidence').value,
    overlap: document.getElementById('overlap').value,
    agnostic: document.getElementById('agnostic').checked,
  });
  return post('/control/parameters?' + q);
}
let loaded = false;
function refresh() {
  return fetch('/status').then(r => r.json()).then(s => {
    document.getElementById('message').textContent = s.message;
    const rows = Object.entries(s.counts).map(([k, v]) => `<tr><td>${k}</td><td>${v}</td></tr>`);
    document.getElementById('counts').innerHTML = rows.join('');
    if (!loaded) {
      document.getElementById('confidence').value = s.parameters.confidence_threshold;
      document.getElementById('overlap').value = s.parameters.overlap_threshold;
      document.getElementById('agnostic').checked = s.parameters.class_agnostic_suppression;
      loaded = true;
    }
    if (s.frames > 0) {
      document.getElementById('frame').src = '/frame.jpg?n=' + s.frames;
    }
  });
}
setInterval(refresh, 250);
refresh();
</script>
</body>
</html>
"#;
