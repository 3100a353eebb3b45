use skinalize_core::Prediction;

pub(crate) struct ClassifyView {
    pub prediction: Prediction,
    pub image_data_uri: String,
}

const STYLE: &str = r#"
body {
    margin: 0;
    background-color: #eef2f7;
    font-family: -apple-system, "Segoe UI", Roboto, sans-serif;
    color: #2b2d42;
}
.navbar {
    background: #2b2d42;
    position: fixed;
    top: 0; left: 0; right: 0;
    padding: 12px 30px;
    display: flex;
    align-items: center;
    gap: 20px;
    z-index: 999;
}
.navbar-title {
    color: #edf2f4;
    font-size: 1.4em;
    font-weight: 600;
    flex-grow: 1;
}
.navbar a {
    background-color: #8d99ae20;
    color: #edf2f4;
    text-decoration: none;
    padding: 8px 18px;
    border-radius: 6px;
    font-size: 1em;
    font-weight: 500;
    transition: all 0.2s ease;
}
.navbar a:hover {
    background-color: #8d99ae40;
    transform: scale(1.05);
}
.spacer { height: 72px; }
.content {
    max-width: 860px;
    margin: 0 auto;
    padding: 20px 30px;
}
h1 { text-align: center; color: #3b3b98; }
.upload {
    background: #ffffff;
    border-radius: 8px;
    padding: 24px;
    margin: 16px 0;
}
.preview { max-width: 100%; border-radius: 8px; }
.result {
    background: #d1fadf;
    border-radius: 8px;
    padding: 12px 18px;
    margin: 16px 0;
    font-size: 1.1em;
}
.chart { margin: 16px 0; }
.chart .row { display: flex; align-items: center; margin: 6px 0; }
.chart .name { width: 110px; }
.chart .bar-track { flex-grow: 1; background: #dfe6ef; border-radius: 4px; }
.chart .bar {
    background: #3b3b98;
    color: #edf2f4;
    border-radius: 4px;
    padding: 3px 6px;
    min-width: 2px;
    white-space: nowrap;
    font-size: 0.85em;
}
footer { text-align: center; padding: 20px; }
hr { border: none; border-top: 1px solid #c9d3e0; }
"#;

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Skinalize</title>
<style>{STYLE}</style>
</head>
<body>
<div class="navbar">
    <div class="navbar-title">Welcome to Skinalize</div>
    <a href="/?page=home">&#127968; Home</a>
    <a href="/?page=features">&#10024; Features</a>
    <a href="/?page=faq">&#10067; FAQ</a>
    <a href="/?page=contact">&#128236; Contact</a>
</div>
<div class="spacer"></div>
<div class="content">
{body}
<hr>
<footer>Made with &#10084;&#65039; using Skinalize</footer>
</div>
</body>
</html>
"#
    )
}

pub(crate) fn home(result: Option<&ClassifyView>) -> String {
    let mut body = String::from(
        r#"<h1>&#129716; Skinalize</h1>
<h3>Upload a skin image and let AI help with diagnosis suggestions.</h3>
<div class="upload">
    <form action="/classify" method="post" enctype="multipart/form-data">
        <label for="image">&#128247; Upload an Image</label><br><br>
        <input type="file" id="image" name="image" accept=".jpg,.jpeg,.png" required>
        <button type="submit">Analyze</button>
    </form>
</div>
"#,
    );
    if let Some(view) = result {
        body.push_str(&format!(
            r#"<img class="preview" src="{}" alt="uploaded image">
<div class="result">&#9989; <strong>{}</strong> &mdash; {:.2}%</div>
<div class="chart">{}</div>
"#,
            view.image_data_uri,
            view.prediction.label,
            view.prediction.confidence * 100.0,
            bar_chart(&view.prediction),
        ));
    }
    layout(&body)
}

fn bar_chart(prediction: &Prediction) -> String {
    prediction
        .scores
        .iter()
        .map(|score| {
            format!(
                r#"<div class="row"><span class="name">{}</span><div class="bar-track"><div class="bar" style="width:{:.1}%">{:.1}%</div></div></div>"#,
                score.name,
                (score.probability * 100.0).max(1.0),
                score.probability * 100.0,
            )
        })
        .collect()
}

pub(crate) fn features() -> String {
    layout(
        r#"<h2>&#10024; Features</h2>
<ul>
    <li>&#129302; <strong>AI-Powered Diagnosis</strong></li>
    <li>&#128247; <strong>One-click Image Upload</strong></li>
    <li>&#9889; <strong>Real-time Results</strong></li>
    <li>&#128274; <strong>Privacy-first: No images stored</strong></li>
    <li>&#128241; <strong>Mobile &amp; Desktop Friendly</strong></li>
</ul>
"#,
    )
}

pub(crate) fn faq() -> String {
    layout(
        r#"<h2>&#10067; Frequently Asked Questions</h2>
<details><summary>What conditions can it detect?</summary>
<p>Acne, Eczema, Psoriasis, Rosacea, Vitiligo.</p></details>
<details><summary>Is it a medical diagnosis?</summary>
<p>No&mdash;always consult a professional.</p></details>
<details><summary>Is it free?</summary>
<p>Yes, totally free and anonymous.</p></details>
"#,
    )
}

pub(crate) fn contact() -> String {
    layout(
        r#"<h2>&#128236; Contact Us</h2>
<p>&#128231; skinalize.help@gmail.com</p>
"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use skinalize_core::CLASS_NAMES;

    #[test]
    fn every_page_carries_the_navbar() {
        for page in [home(None), features(), faq(), contact()] {
            for target in ["?page=home", "?page=features", "?page=faq", "?page=contact"] {
                assert!(page.contains(target), "missing {target}");
            }
        }
    }

    #[test]
    fn home_offers_the_upload_form() {
        let page = home(None);
        assert!(page.contains(r#"action="/classify""#));
        assert!(page.contains(r#"enctype="multipart/form-data""#));
        assert!(page.contains(r#"accept=".jpg,.jpeg,.png""#));
    }

    #[test]
    fn results_render_one_bar_per_class() {
        let prediction = serde_json::from_value::<Prediction>(serde_json::json!({
            "label": "Eczema",
            "confidence": 0.62,
            "scores": CLASS_NAMES
                .iter()
                .map(|name| serde_json::json!({"name": name, "probability": 0.2}))
                .collect::<Vec<_>>(),
        }))
        .unwrap();
        let view = ClassifyView {
            prediction,
            image_data_uri: "data:image/png;base64,AAAA".to_string(),
        };
        let page = home(Some(&view));
        assert!(page.contains("Eczema"));
        assert!(page.contains("62.00%"));
        for class in CLASS_NAMES {
            assert!(page.contains(class));
        }
    }
}
