use axum::{response::Html, Router, routing::get};

pub fn router() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> Html<&'static str> {
    Html(r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Clinical SQL - Ask your trial data</title>
  <style>
    body { font-family: Arial, sans-serif; margin: 2rem; color: #1d1d1f; max-width: 60rem; }
    h1 { margin-bottom: 0.5rem; }
    .card { border: 1px solid #ddd; padding: 1rem; border-radius: 8px; margin-bottom: 1rem; }
    label { display: block; margin-top: 0.75rem; font-weight: 600; }
    input[type=text], input[type=password], textarea { width: 100%; padding: 0.5rem; box-sizing: border-box; }
    .sources label { display: inline; font-weight: normal; margin-right: 1rem; }
    .source-panel { display: none; }
    .source-panel.active { display: block; }
    button { margin-top: 1rem; padding: 0.6rem 1rem; }
    .notice-info { color: #0b5394; }
    .notice-warning { color: #b45f06; }
    .notice-error { color: #cc0000; }
    .answer { background: #eef7ee; padding: 0.75rem; border-radius: 6px; margin: 0.5rem 0; }
    details { margin: 0.25rem 0; }
    pre { background: #f6f8fa; padding: 0.5rem; overflow: auto; white-space: pre-wrap; }
  </style>
</head>
<body>
  <h1>Clinical SQL</h1>
  <p>Load CSV, XLSX or SAS transport (XPT) files and ask questions about them in plain English.</p>

  <form id="queryForm" class="card">
    <label for="apiKey">OpenAI API key</label>
    <input id="apiKey" name="api_key" type="password" placeholder="Leave blank to use the server's key" />

    <label>Data source</label>
    <div class="sources">
      <label><input type="radio" name="source" value="upload" checked /> Upload files</label>
      <label><input type="radio" name="source" value="folder" /> Local folder</label>
      <label><input type="radio" name="source" value="urls" /> URLs</label>
      <label><input type="radio" name="source" value="remote" /> Default files</label>
    </div>

    <div id="panel-upload" class="source-panel active">
      <label for="files">Files (.csv, .xlsx, .xpt)</label>
      <input id="files" name="files" type="file" multiple accept=".csv,.xlsx,.xpt" />
    </div>
    <div id="panel-folder" class="source-panel">
      <label for="folderPath">Folder path on the server</label>
      <input id="folderPath" name="folder_path" type="text" placeholder="/data/trial-042" />
    </div>
    <div id="panel-urls" class="source-panel">
      <label for="urls">One URL per line</label>
      <textarea id="urls" name="urls" rows="4"></textarea>
    </div>
    <div id="panel-remote" class="source-panel">
      <p id="remoteFiles">Loading default file list...</p>
    </div>

    <label for="question">Question</label>
    <input id="question" name="question" type="text" placeholder="How many subjects reported a headache?" />
    <button type="submit" id="runBtn">Run</button>
  </form>

  <div class="card">
    <h2>Results</h2>
    <div id="output"></div>
  </div>

  <script>
    const form = document.getElementById('queryForm');
    const output = document.getElementById('output');
    const runBtn = document.getElementById('runBtn');

    document.querySelectorAll('input[name=source]').forEach(radio => {
      radio.addEventListener('change', () => {
        document.querySelectorAll('.source-panel').forEach(p => p.classList.remove('active'));
        document.getElementById('panel-' + radio.value).classList.add('active');
      });
    });

    fetch('/api/sources/remote')
      .then(res => res.json())
      .then(json => {
        document.getElementById('remoteFiles').textContent =
          'Fetches ' + json.files.join(', ') + ' from ' + json.base_url;
      })
      .catch(() => {});

    function append(el) {
      output.appendChild(el);
      return el;
    }

    function line(text, cls) {
      const p = document.createElement('p');
      p.textContent = text;
      if (cls) p.className = cls;
      return append(p);
    }

    function render(name, data) {
      switch (name) {
        case 'notice':
          line(data.message, 'notice-' + data.level);
          break;
        case 'loaded':
          line('Loaded ' + data.file_name + ' into table "' + data.table + '" (' +
            data.rows + ' rows; columns: ' + data.columns.join(', ') + ')', 'notice-info');
          break;
        case 'step': {
          const details = document.createElement('details');
          const summary = document.createElement('summary');
          summary.textContent = data.table + ' - step ' + data.step.iteration + ': ' + data.step.tool;
          const pre = document.createElement('pre');
          pre.textContent = (data.step.thought ? data.step.thought + '\n' : '') +
            'Input: ' + data.step.tool_input + '\n\nObservation:\n' + data.step.observation;
          details.append(summary, pre);
          append(details);
          break;
        }
        case 'answer': {
          const div = document.createElement('div');
          div.className = 'answer';
          div.textContent = data.table + ': ' + data.answer;
          append(div);
          break;
        }
        case 'done':
          line('Finished: ' + data.loaded + ' table(s) loaded, ' + data.answered + ' answered.');
          break;
      }
    }

    function dispatch(block) {
      let name = 'message';
      const data = [];
      for (const raw of block.split('\n')) {
        if (raw.startsWith('event:')) name = raw.slice(6).trim();
        else if (raw.startsWith('data:')) data.push(raw.slice(5).trim());
      }
      if (data.length) render(name, JSON.parse(data.join('\n')));
    }

    form.addEventListener('submit', async (event) => {
      event.preventDefault();
      output.innerHTML = '';
      runBtn.disabled = true;
      try {
        const res = await fetch('/api/query', { method: 'POST', body: new FormData(form) });
        if (!res.ok) {
          const json = await res.json().catch(() => ({ error: res.statusText }));
          line(json.error, 'notice-error');
          return;
        }
        const reader = res.body.getReader();
        const decoder = new TextDecoder();
        let buffer = '';
        while (true) {
          const { value, done } = await reader.read();
          if (done) break;
          buffer += decoder.decode(value, { stream: true });
          let idx;
          while ((idx = buffer.indexOf('\n\n')) >= 0) {
            dispatch(buffer.slice(0, idx));
            buffer = buffer.slice(idx + 2);
          }
        }
      } catch (err) {
        line(String(err), 'notice-error');
      } finally {
        runBtn.disabled = false;
      }
    });
  </script>
</body>
</html>"#)
}
