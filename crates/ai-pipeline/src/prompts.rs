/// Instructions sent to the backend at each stage, plus output clean-up
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert interior designer and photo editor with a focus on sustainable and modern design. The user will provide up to five images of 'Corkbrick' solutions. Your task is to artistically combine all the Corkbrick items from the images into a single, cohesive, and beautifully decorated scene that matches the user's text prompt. The final image should be highly decorative, featuring elements like lush indoor plants, modern paintings, and sustainable materials. Focus on changing the background and environment while keeping the Corkbrick items as the central, unchanged subjects. Do not change the Corkbrick items themselves, only their surroundings and the image's aesthetic.";

pub const DEFAULT_VIDEO_PROMPT: &str = "Create a short, cinematic video with a gentle, slow 'walk-around' or panning camera motion of the scene. The video should be calm and visually appealing, highlighting the atmosphere.";

/// Used when the naming stage fails or returns nothing usable
pub const FALLBACK_FILENAME: &str = "corkbrick-generated-image";

/// Download name when no filename was generated
pub const DEFAULT_DOWNLOAD_NAME: &str = "corkbrick-scenario";

/// File name of the exported system prompt
pub const SYSTEM_PROMPT_EXPORT_NAME: &str = "corkbrick-system-prompt.txt";

/// Edit instruction: system prompt followed by the quoted user prompt
pub fn edit_instruction(system_prompt: &str, user_prompt: &str) -> String {
    format!("{system_prompt}\n\n---\n\nUser prompt: \"{user_prompt}\"")
}

pub fn describe_instruction(user_prompt: &str) -> String {
    format!(
        "You are a creative marketing assistant for 'Corkbrick', a modular furniture brand.\n\
         A user provided this prompt: \"{user_prompt}\".\n\
         Based on the user's prompt and the image provided, write a short, powerful, and inspiring marketing description for the resulting scene.\n\
         Focus on the versatility and appeal of the Corkbrick solution in this new environment. The description should be 1-2 sentences long."
    )
}

pub fn filename_instruction(description: &str) -> String {
    format!(
        "You are a file naming assistant.\n\
         Based on the following description of an image, create a short, descriptive, file-safe filename.\n\
         The filename should be in kebab-case (e.g., 'modern-living-room-beach-view') and be no more than 5-6 words long.\n\
         Do not include any file extension.\n\n\
         Description: \"{description}\""
    )
}

/// Text post-processing utilities
pub mod postprocess {
    /// Collapse whitespace runs and trim
    pub fn clean_text(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Reduce model output to a kebab-case, file-safe stem
    pub fn sanitize_filename(raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        let kept: String = lowered
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
            .collect();

        let mut out = String::with_capacity(kept.len());
        for c in kept.chars() {
            let c = if c.is_whitespace() { '-' } else { c };
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::postprocess::*;
    use super::*;

    #[test]
    fn test_edit_instruction_layout() {
        let text = edit_instruction("SYSTEM", "a beach house");
        assert_eq!(text, "SYSTEM\n\n---\n\nUser prompt: \"a beach house\"");
    }

    #[test]
    fn test_instructions_embed_inputs() {
        assert!(describe_instruction("snowy cabin").contains("\"snowy cabin\""));
        assert!(filename_instruction("A bright loft.").contains("Description: \"A bright loft.\""));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("  Modern Living Room: Beach View!  "),
            "modern-living-room-beach-view"
        );
        assert_eq!(sanitize_filename("'cozy--loft'.png"), "cozy-loftpng");
        assert_eq!(sanitize_filename("a \n\t b"), "a-b");
        assert_eq!(sanitize_filename("???"), "");
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  extra   spaces\nhere  "), "extra spaces here");
    }
}
