//! The fixed restyling instruction sent with every portrait.

/// Apparel palette: red, white, royal blue and gold.
pub const PALETTE: [&str; 4] = ["#E41E26", "#FFFFFF", "#0018A8", "#FFD700"];

/// Instruction sent alongside the uploaded portrait.
pub const RECOLOR_PROMPT: &str = "\
Edit this portrait photo in two ways: recolor the clothing with a photorealistic \
finish, and replace the background with a painterly abstract artwork celebrating \
Merdeka (Malaysian Independence Day).

Clothing:
- Change only the apparel (shirt, t-shirt, blouse, jacket).
- Keep the face, skin tone, hair and accessories such as glasses or jewelry exactly \
as they are, including reflections in glasses. The person must stay photorealistic.
- Keep the fabric's texture, folds, wrinkles, shadows and highlights so the new \
colors look natural rather than like a flat overlay.
- Use a tasteful, modern pattern built from red (#E41E26), white (#FFFFFF), \
blue (#0018A8) and yellow (#FFD700). Do not reproduce the Malaysian flag itself.

Background:
- Replace the original background completely with a painterly abstract scene: \
dynamic brushstrokes, rich texture, subtle gold leaf accents, a sense of motion \
and festive energy.
- Keep the area behind the person soft and low in detail, with seamless edges.
- Blend the person into the new scene, matching the lighting to its atmosphere \
while keeping their facial details unchanged.
- No flags, flag motifs, text, watermarks or logos.

Output a single high-resolution composite image and nothing else.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_every_palette_color() {
        for color in PALETTE {
            assert!(RECOLOR_PROMPT.contains(color), "missing {color}");
        }
    }

    #[test]
    fn test_prompt_protects_identity() {
        assert!(RECOLOR_PROMPT.contains("face"));
        assert!(RECOLOR_PROMPT.contains("photorealistic"));
    }
}
