use serde_json::{json, Map, Value};

use crate::codec::SceneBuffers;

pub mod gl {
    pub const FLOAT: u32 = 5126;
    pub const FLOAT_VEC2: u32 = 35664;
    pub const FLOAT_VEC3: u32 = 35665;
    pub const FLOAT_VEC4: u32 = 35666;
    pub const FLOAT_MAT3: u32 = 35675;
    pub const FLOAT_MAT4: u32 = 35676;
    pub const SAMPLER_2D: u32 = 35678;

    pub const FRAGMENT_SHADER: u32 = 35632;
    pub const VERTEX_SHADER: u32 = 35633;

    pub const CULL_FACE: u32 = 2884;
    pub const DEPTH_TEST: u32 = 2929;
    pub const BLEND: u32 = 3042;
    pub const ONE: u32 = 1;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 771;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveShape {
    Mesh,
    Polyline,
}

/// Everything that changes the generated shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TechniqueKey {
    pub shape: PrimitiveShape,
    pub textured: bool,
    pub transparent: bool,
    pub unlit: bool,
    pub batched: bool,
}

impl TechniqueKey {
    pub fn name_prefix(&self) -> String {
        let mut s = String::new();
        s.push_str(match self.shape {
            PrimitiveShape::Mesh => "Mesh",
            PrimitiveShape::Polyline => "Polyline",
        });
        s.push_str(if self.textured { "Textured" } else { "Colored" });
        if self.transparent {
            s.push_str("Transparent");
        }
        s.push_str(if self.unlit { "Unlit" } else { "Lit" });
        if !self.batched {
            s.push_str("NoId");
        }
        s
    }

    pub fn lit(&self) -> bool {
        !self.unlit && self.shape == PrimitiveShape::Mesh
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TechniqueId(pub usize);

/// Per-scene technique table; each distinct key is emitted once.
#[derive(Debug, Default)]
pub struct TechniqueCache {
    keys: Vec<TechniqueKey>,
}

#[derive(Debug, Default)]
pub struct TechniqueJson {
    pub techniques: Map<String, Value>,
    pub programs: Map<String, Value>,
    pub shaders: Map<String, Value>,
}

impl TechniqueCache {
    pub fn new() -> Self {
        TechniqueCache { keys: Vec::new() }
    }

    pub fn get_or_insert(&mut self, key: TechniqueKey) -> TechniqueId {
        if let Some(i) = self.keys.iter().position(|k| *k == key) {
            return TechniqueId(i);
        }
        self.keys.push(key);
        TechniqueId(self.keys.len() - 1)
    }

    pub fn key(&self, id: TechniqueId) -> TechniqueKey {
        self.keys[id.0]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn technique_name(&self, id: TechniqueId) -> String {
        format!("{}Technique", self.keys[id.0].name_prefix())
    }

    /// Appends shader sources to the buffer and returns the technique, program and shader tables.
    pub fn emit(&self, buffers: &mut SceneBuffers) -> TechniqueJson {
        let mut out = TechniqueJson::default();
        for (i, key) in self.keys.iter().enumerate() {
            let prefix = key.name_prefix();
            let program_name = format!("{}Program", prefix);
            let vs_name = format!("{}VertexShader", prefix);
            let fs_name = format!("{}FragmentShader", prefix);

            let vs_view = buffers.add_view(vertex_shader(key).as_bytes(), None);
            let fs_view = buffers.add_view(fragment_shader(key).as_bytes(), None);

            out.shaders.insert(vs_name.clone(), shader_json(gl::VERTEX_SHADER, &vs_view.name()));
            out.shaders.insert(fs_name.clone(), shader_json(gl::FRAGMENT_SHADER, &fs_view.name()));

            let layout = TechniqueLayout::new(key);
            out.programs.insert(
                program_name.clone(),
                json!({
                    "attributes": layout.attributes.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
                    "vertexShader": vs_name,
                    "fragmentShader": fs_name,
                }),
            );
            out.techniques.insert(
                self.technique_name(TechniqueId(i)),
                layout.technique_json(key, &program_name),
            );
        }
        out
    }
}

fn shader_json(kind: u32, view: &str) -> Value {
    json!({
        "type": kind,
        "extensions": { "KHR_binary_glTF": { "bufferView": view } }
    })
}

/// Parameter, attribute and uniform names for one key.
struct TechniqueLayout {
    parameters: Vec<(&'static str, u32, Option<&'static str>)>,
    attributes: Vec<(&'static str, &'static str)>,
    uniforms: Vec<(&'static str, &'static str)>,
}

impl TechniqueLayout {
    fn new(key: &TechniqueKey) -> Self {
        let mut parameters = vec![
            ("mv", gl::FLOAT_MAT4, Some("MODELVIEW")),
            ("proj", gl::FLOAT_MAT4, Some("PROJECTION")),
            ("pos", gl::FLOAT_VEC3, Some("POSITION")),
        ];
        let mut attributes = vec![("a_pos", "pos")];
        let mut uniforms = vec![("u_mv", "mv"), ("u_proj", "proj")];

        if key.batched {
            parameters.push(("batch", gl::FLOAT, Some("BATCHID")));
            attributes.push(("a_batchId", "batch"));
        }

        match key.shape {
            PrimitiveShape::Mesh => {
                if key.lit() {
                    parameters.push(("n", gl::FLOAT_VEC2, Some("NORMAL")));
                    parameters.push(("nmx", gl::FLOAT_MAT3, Some("MODELVIEWINVERSETRANSPOSE")));
                    parameters.push(("specularColor", gl::FLOAT_VEC3, None));
                    parameters.push(("specularExponent", gl::FLOAT, None));
                    attributes.push(("a_n", "n"));
                    uniforms.push(("u_nmx", "nmx"));
                    uniforms.push(("u_specularColor", "specularColor"));
                    uniforms.push(("u_specularExponent", "specularExponent"));
                }
            }
            PrimitiveShape::Polyline => {
                parameters.push(("direction", gl::FLOAT_VEC3, Some("_DIRECTION")));
                parameters.push(("vertexDelta", gl::FLOAT_VEC2, Some("_VERTEXDELTA")));
                parameters.push(("viewport", gl::FLOAT_VEC4, Some("VIEWPORT")));
                parameters.push(("halfWidth", gl::FLOAT, None));
                parameters.push(("feather", gl::FLOAT, None));
                attributes.push(("a_direction", "direction"));
                attributes.push(("a_vertexDelta", "vertexDelta"));
                uniforms.push(("u_viewport", "viewport"));
                uniforms.push(("u_halfWidth", "halfWidth"));
                uniforms.push(("u_feather", "feather"));
            }
        }

        if key.textured {
            parameters.push(("texc", gl::FLOAT_VEC2, Some("TEXCOORD_0")));
            parameters.push(("tex", gl::SAMPLER_2D, None));
            attributes.push(("a_texc", "texc"));
            uniforms.push(("u_tex", "tex"));
        } else {
            parameters.push(("color", gl::FLOAT_VEC4, None));
            uniforms.push(("u_color", "color"));
        }

        TechniqueLayout {
            parameters,
            attributes,
            uniforms,
        }
    }

    fn technique_json(&self, key: &TechniqueKey, program: &str) -> Value {
        let mut parameters = Map::new();
        for (name, ty, semantic) in &self.parameters {
            let mut p = json!({ "type": ty });
            if let Some(s) = semantic {
                p["semantic"] = json!(s);
            }
            parameters.insert(name.to_string(), p);
        }

        let states = if key.transparent {
            json!({
                "enable": [gl::DEPTH_TEST, gl::BLEND],
                "disable": [gl::CULL_FACE],
                "functions": {
                    "blendFuncSeparate": [gl::ONE, gl::ONE_MINUS_SRC_ALPHA, gl::ONE, gl::ONE_MINUS_SRC_ALPHA],
                    "depthMask": [false],
                }
            })
        } else {
            json!({
                "enable": [gl::DEPTH_TEST],
                "disable": [gl::CULL_FACE],
            })
        };

        let attributes: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(a, p)| (a.to_string(), json!(p)))
            .collect();
        let uniforms: Map<String, Value> = self
            .uniforms
            .iter()
            .map(|(u, p)| (u.to_string(), json!(p)))
            .collect();

        json!({
            "parameters": parameters,
            "program": program,
            "states": states,
            "attributes": attributes,
            "uniforms": uniforms,
        })
    }
}

const PRECISION: &str = "precision highp float;\n";

const OCT_DECODE: &str = r#"
vec3 octDecode(vec2 e) {
    e = e / 255.0 * 2.0 - 1.0;
    vec3 n = vec3(e.x, e.y, 1.0 - abs(e.x) - abs(e.y));
    if (n.z < 0.0) {
        vec2 s = vec2(n.x >= 0.0 ? 1.0 : -1.0, n.y >= 0.0 ? 1.0 : -1.0);
        n.xy = (1.0 - abs(n.yx)) * s;
    }
    return normalize(n);
}
"#;

pub fn vertex_shader(key: &TechniqueKey) -> String {
    let mut s = String::from(PRECISION);
    s.push_str("attribute vec3 a_pos;\nuniform mat4 u_mv;\nuniform mat4 u_proj;\n");
    if key.batched {
        s.push_str("attribute float a_batchId;\n");
    }
    if key.textured {
        s.push_str("attribute vec2 a_texc;\nvarying vec2 v_texc;\n");
    }

    match key.shape {
        PrimitiveShape::Mesh => {
            if key.lit() {
                s.push_str("attribute vec2 a_n;\nuniform mat3 u_nmx;\nvarying vec3 v_n;\n");
                s.push_str(OCT_DECODE);
            }
            s.push_str("void main(void) {\n");
            s.push_str("    gl_Position = u_proj * u_mv * vec4(a_pos, 1.0);\n");
            if key.lit() {
                s.push_str("    v_n = u_nmx * octDecode(a_n);\n");
            }
        }
        PrimitiveShape::Polyline => {
            s.push_str(
                "attribute vec3 a_direction;\nattribute vec2 a_vertexDelta;\n\
                 uniform vec4 u_viewport;\nuniform float u_halfWidth;\nuniform float u_feather;\n\
                 varying float v_side;\n",
            );
            s.push_str("void main(void) {\n");
            s.push_str(
                "    float toEnd = a_vertexDelta.y > 0.5 ? -1.0 : 1.0;\n\
                 \x20   vec4 p0 = u_proj * u_mv * vec4(a_pos, 1.0);\n\
                 \x20   vec4 p1 = u_proj * u_mv * vec4(a_pos + toEnd * a_direction, 1.0);\n\
                 \x20   vec2 dir = normalize((p1.xy / p1.w - p0.xy / p0.w) * u_viewport.zw) * toEnd;\n\
                 \x20   vec2 perp = vec2(-dir.y, dir.x);\n\
                 \x20   float width = u_halfWidth + u_feather;\n\
                 \x20   p0.xy += perp * a_vertexDelta.x * width * 2.0 / u_viewport.zw * p0.w;\n\
                 \x20   v_side = a_vertexDelta.x;\n\
                 \x20   gl_Position = p0;\n",
            );
        }
    }

    if key.textured {
        s.push_str("    v_texc = a_texc;\n");
    }
    s.push_str("}\n");
    s
}

pub fn fragment_shader(key: &TechniqueKey) -> String {
    let mut s = String::from(PRECISION);
    if key.textured {
        s.push_str("uniform sampler2D u_tex;\nvarying vec2 v_texc;\n");
    } else {
        s.push_str("uniform vec4 u_color;\n");
    }
    if key.lit() {
        s.push_str(
            "varying vec3 v_n;\nuniform vec3 u_specularColor;\nuniform float u_specularExponent;\n",
        );
    }
    if key.shape == PrimitiveShape::Polyline {
        s.push_str("uniform float u_halfWidth;\nuniform float u_feather;\nvarying float v_side;\n");
    }

    s.push_str("void main(void) {\n");
    if key.textured {
        s.push_str("    vec4 color = texture2D(u_tex, v_texc);\n");
    } else {
        s.push_str("    vec4 color = u_color;\n");
    }
    if key.lit() {
        s.push_str(
            "    vec3 n = normalize(v_n);\n\
             \x20   float diffuse = 0.3 + 0.7 * abs(n.z);\n\
             \x20   float spec = pow(abs(n.z), u_specularExponent);\n\
             \x20   color.rgb = color.rgb * diffuse + u_specularColor * spec * 0.2;\n",
        );
    }
    if key.shape == PrimitiveShape::Polyline {
        s.push_str(
            "    float width = u_halfWidth + u_feather;\n\
             \x20   float edge = (1.0 - abs(v_side)) * width;\n\
             \x20   color.a *= clamp(edge / u_feather, 0.0, 1.0);\n",
        );
    }
    if key.transparent {
        s.push_str("    color.rgb *= color.a;\n");
    }
    s.push_str("    gl_FragColor = color;\n}\n");
    s
}
