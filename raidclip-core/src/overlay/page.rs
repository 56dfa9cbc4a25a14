//! The overlay page served to browser sources.

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>raidclip overlay</title>
    <style>
        html, body { margin: 0; padding: 0; background: transparent; overflow: hidden; }
        #clip-player { width: {{WIDTH}}px; height: {{HEIGHT}}px; }
    </style>
</head>
<body>
    <div id="clip-player"></div>

    <script>
        const evtSource = new EventSource("/events");
        const container = document.getElementById("clip-player");

        function clear() {
            container.innerHTML = "";
        }

        evtSource.addEventListener("on", function (event) {
            const data = JSON.parse(event.data);
            clear();
            const player = document.createElement("video");
            player.id = "clip-player-body";
            player.autoplay = true;
            player.width = data.width;
            player.height = data.height;
            player.src = data.src;
            player.addEventListener("ended", function () {
                clear();
                fetch("/api/ended", {
                    method: "POST",
                    headers: { "Content-Type": "application/json" },
                    body: JSON.stringify({ src: data.src, session: data.session }),
                });
            });
            container.appendChild(player);
            player.play();
        });

        evtSource.addEventListener("off", function () {
            clear();
        });
    </script>
</body>
</html>
"#;

pub fn render(width: u32, height: u32) -> String {
    TEMPLATE
        .replace("{{WIDTH}}", &width.to_string())
        .replace("{{HEIGHT}}", &height.to_string())
}
